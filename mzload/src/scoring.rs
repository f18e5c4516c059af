//! Peptide and protein scoring strategies, chosen from the selected main score.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{Curie, PsmRecord, ScoreDescriptor};

/// Peptide scoring, a peptide always gets the score of its best PSM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeptideScoring {
    /// The score to use, without a score no peptide gets a score
    pub accession: Option<Curie>,
    /// The polarity of the score
    pub higher_is_better: bool,
}

impl PeptideScoring {
    /// The score of the best PSM that has the score, `None` if no PSM has it
    pub fn score<'a>(&self, psms: impl IntoIterator<Item = &'a PsmRecord>) -> Option<f64> {
        let accession = self.accession?;
        let values = psms.into_iter().filter_map(|psm| psm.score(&accession));
        if self.higher_is_better {
            values.max_by_key(|v| OrderedFloat(*v))
        } else {
            values.min_by_key(|v| OrderedFloat(*v))
        }
    }
}

/// How peptide scores are combined into a protein score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProteinScoring {
    /// Sum the peptide scores, a higher protein score is better
    Additive,
    /// Multiply the peptide scores, a lower protein score is better (for probability like scores)
    Multiplicative,
}

impl ProteinScoring {
    /// Combine the given peptide scores, `None` if there are none
    pub fn combine(self, peptide_scores: impl IntoIterator<Item = f64>) -> Option<f64> {
        let mut scores = peptide_scores.into_iter();
        let first = scores.next()?;
        Some(match self {
            Self::Additive => scores.fold(first, |acc, s| acc + s),
            Self::Multiplicative => scores.fold(first, |acc, s| acc * s),
        })
    }

    /// A key where a bigger value means a better protein score, a missing score is worst
    pub fn rank_key(self, score: Option<f64>) -> Option<OrderedFloat<f64>> {
        score.map(|s| match self {
            Self::Additive => OrderedFloat(s),
            Self::Multiplicative => OrderedFloat(-s),
        })
    }
}

/// The combination of peptide and protein scoring used for one inference run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringStrategy {
    /// Peptide level
    pub peptide: PeptideScoring,
    /// Protein level
    pub protein: ProteinScoring,
}

impl ScoringStrategy {
    /// Derive the scoring from the selected main score. Only a score where lower is better leads
    /// to multiplicative protein scoring, an unknown polarity (no score) defaults to additive.
    pub fn choose(selected: Option<&ScoreDescriptor>) -> Self {
        let peptide = PeptideScoring {
            accession: selected.map(|score| score.accession),
            higher_is_better: selected.is_none_or(|score| score.higher_is_better),
        };
        let protein = match selected {
            Some(score) if !score.higher_is_better => ProteinScoring::Multiplicative,
            _ => ProteinScoring::Additive,
        };
        Self { peptide, protein }
    }
}
