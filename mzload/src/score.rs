//! Known PSM level scores and the selection of the main score from a score vocabulary.

use crate::{Curie, curie};

/// A score that can be attached to PSMs, as defined in a controlled vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreDescriptor {
    /// The CV term defining this score
    pub accession: Curie,
    /// The human readable name of the CV term
    pub name: &'static str,
    /// If this is the designated primary score of the search engine that produces it
    pub is_main_score: bool,
    /// If a higher value of this score means a more confident identification
    pub higher_is_better: bool,
}

impl ScoreDescriptor {
    const fn new(
        accession: Curie,
        name: &'static str,
        is_main_score: bool,
        higher_is_better: bool,
    ) -> Self {
        Self {
            accession,
            name,
            is_main_score,
            higher_is_better,
        }
    }

    /// Resolve an accession against the table of known scores
    pub fn by_accession(accession: &Curie) -> Option<&'static Self> {
        KNOWN_SCORES.iter().find(|score| score.accession == *accession)
    }

    /// Check if `a` is a better value than `b` for this score
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        if self.higher_is_better { a > b } else { a < b }
    }
}

impl std::fmt::Display for ScoreDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.accession)
    }
}

/// All PSM level scores that can be recognised from a score vocabulary
pub static KNOWN_SCORES: &[ScoreDescriptor] = &[
    ScoreDescriptor::new(curie!(MS:1001171), "Mascot:score", true, true),
    ScoreDescriptor::new(curie!(MS:1001172), "Mascot:expectation value", false, false),
    ScoreDescriptor::new(curie!(MS:1001155), "SEQUEST:xcorr", true, true),
    ScoreDescriptor::new(curie!(MS:1001328), "OMSSA:evalue", true, false),
    ScoreDescriptor::new(curie!(MS:1001329), "OMSSA:pvalue", false, false),
    ScoreDescriptor::new(curie!(MS:1001330), "X!Tandem:expect", true, false),
    ScoreDescriptor::new(curie!(MS:1001331), "X!Tandem:hyperscore", false, true),
    ScoreDescriptor::new(curie!(MS:1002049), "MS-GF:RawScore", false, true),
    ScoreDescriptor::new(curie!(MS:1002052), "MS-GF:SpecEValue", true, false),
    ScoreDescriptor::new(curie!(MS:1002053), "MS-GF:EValue", false, false),
    ScoreDescriptor::new(curie!(MS:1002252), "Comet:xcorr", true, true),
    ScoreDescriptor::new(curie!(MS:1002257), "Comet:expectation value", false, false),
    ScoreDescriptor::new(curie!(MS:1001950), "PEAKS:peptideScore", true, true),
    ScoreDescriptor::new(curie!(MS:1002466), "PeptideShaker PSM score", true, true),
    ScoreDescriptor::new(curie!(MS:1001492), "percolator:score", false, true),
    ScoreDescriptor::new(curie!(MS:1001491), "percolator:Q value", false, false),
    ScoreDescriptor::new(curie!(MS:1001390), "Phenyx:Score", true, true),
];

/// Select the main score from the peptide level score vocabulary of a source.
///
/// The vocabulary is walked in the given order and the first entry that resolves to a known main
/// score wins, later (possibly better suited) main scores are not considered. Returns `None` when
/// no entry is a known main score.
pub fn select_main_score<'a>(
    vocabulary: impl IntoIterator<Item = &'a Curie>,
) -> Option<&'static ScoreDescriptor> {
    vocabulary
        .into_iter()
        .filter_map(ScoreDescriptor::by_accession)
        .find(|score| score.is_main_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_main_score_wins() {
        // Mascot expectation (not main), SEQUEST xcorr (main), Mascot score (main)
        let vocabulary = [curie!(MS:1001172), curie!(MS:1001155), curie!(MS:1001171)];
        let selected = select_main_score(&vocabulary).unwrap();
        assert_eq!(selected.accession, curie!(MS:1001155));
    }

    #[test]
    fn unknown_and_secondary_scores_select_nothing() {
        let vocabulary = [curie!(MS:1), curie!(PRIDE:521), curie!(MS:1002049)];
        assert_eq!(select_main_score(&vocabulary), None);
        assert_eq!(select_main_score(std::iter::empty()), None);
    }

    #[test]
    fn known_scores_are_unique() {
        for (index, score) in KNOWN_SCORES.iter().enumerate() {
            assert!(
                KNOWN_SCORES[index + 1..]
                    .iter()
                    .all(|other| other.accession != score.accession),
                "{score} is defined twice"
            );
        }
    }

    #[test]
    fn polarity() {
        let evalue = ScoreDescriptor::by_accession(&curie!(MS:1002052)).unwrap();
        assert!(evalue.is_better(1e-10, 1e-3));
        let xcorr = ScoreDescriptor::by_accession(&curie!(MS:1001155)).unwrap();
        assert!(xcorr.is_better(3.2, 1.1));
    }
}
