//! The [`LoadErrorKind`] which makes it easy for users of the loader to match on the exact failure.

use std::path::Path;

use context_error::*;

/// The kinds of failures that can terminate (or degrade) a single load
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum LoadErrorKind {
    /// The format specific construction of the data source failed
    #[default]
    ConstructionFailure,
    /// Auxiliary (spectrum) files could not be associated, the load continues without them
    AuxiliaryAssociationFailure,
    /// Building the intermediate structure or running the protein inference failed
    InferenceFailure,
    /// No construction capability is registered for the format of the file
    MissingFactory,
    /// A handle for the same origin is already registered
    DuplicateOrigin,
    /// A handle was asked to make a lifecycle transition it cannot make
    InvalidState,
}

impl ErrorKind for LoadErrorKind {
    type Settings = ();
    fn descriptor(&self) -> &'static str {
        match self {
            Self::AuxiliaryAssociationFailure => "warning",
            _ => "error",
        }
    }
    fn ignored(&self, _settings: Self::Settings) -> bool {
        false
    }
    fn is_error(&self, _settings: Self::Settings) -> bool {
        !matches!(self, Self::AuxiliaryAssociationFailure)
    }
}

/// Create an error about the file at `origin`
pub(crate) fn load_error(
    kind: LoadErrorKind,
    short_description: &'static str,
    long_description: impl Into<String>,
    origin: &Path,
) -> BoxedError<'static, LoadErrorKind> {
    BoxedError::new(
        kind,
        short_description,
        long_description.into(),
        Context::none().source(origin.to_string_lossy()).to_owned(),
    )
}
