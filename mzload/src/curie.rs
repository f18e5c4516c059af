//! Controlled vocabulary references as they appear in score vocabularies of identification files.

use serde::{Deserialize, Serialize};

/// Controlled vocabularies that define the scores found in identification files
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum ControlledVocabulary {
    /// The PSI-MS Controlled Vocabulary <https://www.ebi.ac.uk/ols4/ontologies/ms>
    MS,
    /// The PRIDE Controlled Vocabulary <https://www.ebi.ac.uk/ols4/ontologies/pride>
    PRIDE,
    /// Any other vocabulary, these never resolve to a known score
    Unknown,
}

impl std::str::FromStr for ControlledVocabulary {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MS" | "PSI-MS" => Ok(Self::MS),
            "PRIDE" => Ok(Self::PRIDE),
            _ => Ok(Self::Unknown),
        }
    }
}

impl std::fmt::Display for ControlledVocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::MS => "MS",
                Self::PRIDE => "PRIDE",
                Self::Unknown => "?",
            }
        )
    }
}

/// A CURIE is a namespace + accession identifier, for example `MS:1001171`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Curie {
    /// The vocabulary that defines this term
    pub cv: ControlledVocabulary,
    /// The numeric accession within the vocabulary
    pub accession: u32,
}

/// Create a [`Curie`] in a const context: `curie!(MS:1001171)`
#[macro_export]
macro_rules! curie {
    ($ns:ident:$acc:literal) => {
        $crate::Curie {
            cv: $crate::ControlledVocabulary::$ns,
            accession: $acc,
        }
    };
}

impl std::fmt::Display for Curie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:07}", self.cv, self.accession)
    }
}

/// The reasons a text could not be read as a [`Curie`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurieParseError {
    /// There was no `:` or `_` between namespace and accession
    MissingNamespaceSeparator,
    /// The accession part was empty
    EmptyAccession,
    /// The accession was not a number (or too big to fit)
    InvalidAccession(String),
}

impl std::fmt::Display for CurieParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingNamespaceSeparator => {
                write!(f, "missing namespace separator (':' or '_')")
            }
            Self::EmptyAccession => write!(f, "empty accession"),
            Self::InvalidAccession(acc) => write!(f, "invalid numeric accession '{acc}'"),
        }
    }
}

impl std::error::Error for CurieParseError {}

impl std::str::FromStr for Curie {
    type Err = CurieParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cv, accession) = s
            .trim()
            .split_once(':')
            .or_else(|| s.trim().split_once('_'))
            .ok_or(CurieParseError::MissingNamespaceSeparator)?;
        if accession.is_empty() {
            return Err(CurieParseError::EmptyAccession);
        }
        let accession = accession
            .parse::<u32>()
            .map_err(|_| CurieParseError::InvalidAccession(accession.to_string()))?;
        // Unknown CVs are kept as `Unknown`, they just never resolve to a known score
        let cv = cv.parse().unwrap_or(ControlledVocabulary::Unknown);
        Ok(Self { cv, accession })
    }
}
