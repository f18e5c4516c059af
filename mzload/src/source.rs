//! The parsed content of a file as seen by the loader and the inference.

use std::path::PathBuf;

use context_error::BoxedError;
use serde::{Deserialize, Serialize};

use crate::{Curie, LoadErrorKind};

/// Identifier of a protein as reported by the data source
pub type ProteinId = String;
/// Identifier of a peptide as reported by the data source
pub type PeptideId = String;

/// The parsed content behind a [`DataSourceHandle`](crate::DataSourceHandle). The concrete type
/// is format specific and created by a [`SourceFactory`](crate::SourceFactory), the loader and
/// the inference pipeline only ever see this trait.
pub trait DataSource: std::fmt::Debug + Send + Sync {
    /// The peptide level scores present in this source, in the order the source reports them
    fn available_peptide_scores(&self) -> Vec<Curie>;

    /// All proteins with the peptides they are linked to
    /// # Errors
    /// If the proteins could not be read from the underlying file
    fn proteins(&self) -> Result<Vec<ProteinRecord>, BoxedError<'static, LoadErrorKind>>;

    /// All peptides with their PSMs
    /// # Errors
    /// If the peptides could not be read from the underlying file
    fn peptides(&self) -> Result<Vec<PeptideRecord>, BoxedError<'static, LoadErrorKind>>;

    /// The spectra files this source refers to, only multi file formats have these
    fn spectra_data(&self) -> Vec<SpectraDescriptor> {
        Vec::new()
    }
}

/// A protein and the peptides that map to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProteinRecord {
    /// The protein identifier
    pub id: ProteinId,
    /// The identifiers of all peptides mapping to this protein
    pub peptides: Vec<PeptideId>,
}

/// A peptide and the PSMs supporting it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeptideRecord {
    /// The peptide identifier
    pub id: PeptideId,
    /// The amino acid sequence
    pub sequence: String,
    /// All PSMs for this peptide
    pub psms: Vec<PsmRecord>,
}

/// A single peptide spectrum match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsmRecord {
    /// The PSM identifier
    pub id: String,
    /// All scores given to this PSM
    pub scores: Vec<(Curie, f64)>,
}

impl PsmRecord {
    /// Get the value of the given score, if present
    pub fn score(&self, accession: &Curie) -> Option<f64> {
        self.scores
            .iter()
            .find(|(score, _)| score == accession)
            .map(|(_, value)| *value)
    }
}

/// A spectra file as referenced from inside an identification file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectraDescriptor {
    /// The identifier used inside the identification file
    pub id: String,
    /// The location as written in the identification file
    pub location: PathBuf,
}

impl SpectraDescriptor {
    /// Check if the given file is the file this descriptor refers to, compared by file name only
    /// as the location is often an absolute path on the machine that ran the search
    pub fn matches(&self, file: &std::path::Path) -> bool {
        // Locations can be written with windows separators, normalise before taking the name
        let location = self.location.to_string_lossy().replace('\\', "/");
        let name = location.rsplit('/').next().unwrap_or_default();
        file.file_name()
            .is_some_and(|file| file.to_string_lossy().eq_ignore_ascii_case(name))
    }
}
