#![doc = include_str!("../README.md")]

mod curie;
mod error;
mod graph;
mod handle;
mod inference;
mod loader;
mod mapping;
mod registry;
mod score;
mod scoring;
mod source;

pub use curie::*;
pub use error::LoadErrorKind;
pub use graph::*;
pub use handle::*;
pub use inference::*;
pub use loader::*;
pub use mapping::*;
pub use registry::*;
pub use score::*;
pub use scoring::*;
pub use source::*;

/// A subset of the types and traits that are envisioned to be used the most, importing this is a good starting point for working with the crate
pub mod prelude {
    pub use crate::{
        CancellationToken, DataSource, DataSourceHandle, FactoryTable, FormatKind, GroupMapping,
        InMemoryRegistry, LoadOutcome, LoadRequest, Loader, SharedRegistry, SourceFactory,
        SourceRegistry,
    };
}
