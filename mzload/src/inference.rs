//! Protein inference on the intermediate graph.
//!
//! The default [`InferenceMethod::OccamsRazor`] reports the proteins that are needed to explain
//! all observed peptides. Proteins with identical peptide evidence are always reported together
//! as one group, and proteins whose evidence is a strict subset of a reported group are kept as
//! sub groups of that group.

use std::collections::{BTreeSet, HashSet};

use context_error::BoxedError;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    ControllerId, Curie, DataSource, GroupMapping, IntermediateGraph, LoadErrorKind, PeptideId,
    ProteinId, PsmRecord, ScoringStrategy, select_main_score,
};

/// The inference algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InferenceMethod {
    /// Report the groups needed to cover all peptides, picking the group that explains most
    /// unexplained peptides first
    #[default]
    OccamsRazor,
    /// Report every group of proteins with identical peptide evidence
    ReportAll,
}

/// A filter on PSMs, PSMs that do not pass are ignored for inference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PsmFilter {
    /// Keep PSMs with at least this value for the score, PSMs without the score are removed
    ScoreAtLeast {
        /// The score
        accession: Curie,
        /// The minimal value (inclusive)
        threshold: f64,
    },
    /// Keep PSMs with at most this value for the score, PSMs without the score are removed
    ScoreAtMost {
        /// The score
        accession: Curie,
        /// The maximal value (inclusive)
        threshold: f64,
    },
    /// Keep PSMs for peptides of at least this length
    MinimumPeptideLength(usize),
}

impl PsmFilter {
    /// Check if a PSM (for a peptide with the given sequence) passes this filter
    pub fn passes(&self, sequence: &str, psm: &PsmRecord) -> bool {
        match self {
            Self::ScoreAtLeast {
                accession,
                threshold,
            } => psm.score(accession).is_some_and(|s| s >= *threshold),
            Self::ScoreAtMost {
                accession,
                threshold,
            } => psm.score(accession).is_some_and(|s| s <= *threshold),
            Self::MinimumPeptideLength(length) => sequence.chars().count() >= *length,
        }
    }
}

/// The settings for protein inference during loading
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// The algorithm
    pub method: InferenceMethod,
    /// The PSM filters, empty by default
    pub filters: Vec<PsmFilter>,
}

/// A group of proteins that cannot be told apart on the peptide evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredProteinGroup {
    /// The group identifier, unique within one inference run
    pub id: usize,
    /// The member proteins
    pub proteins: BTreeSet<ProteinId>,
    /// The peptides that are evidence for this group
    pub peptides: BTreeSet<PeptideId>,
    /// The protein score
    pub score: Option<f64>,
    /// Groups whose peptides are a strict subset of the peptides of this group
    pub sub_groups: Vec<Self>,
}

impl std::fmt::Display for InferredProteinGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({} peptides",
            self.id,
            self.proteins.iter().join("/"),
            self.peptides.len()
        )?;
        if let Some(score) = self.score {
            write!(f, ", score {score}")?;
        }
        if !self.sub_groups.is_empty() {
            write!(f, ", {} sub groups", self.sub_groups.len())?;
        }
        write!(f, ")")
    }
}

/// Proteins with identical peptide evidence, the unit the algorithm works with
#[derive(Debug)]
struct Candidate {
    proteins: Vec<usize>,
    peptides: BTreeSet<usize>,
    score: Option<f64>,
}

/// Runs protein inference over an intermediate graph
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceEngine {
    scoring: ScoringStrategy,
    method: InferenceMethod,
    filters: Vec<PsmFilter>,
}

impl InferenceEngine {
    /// Create an engine with the given scoring, algorithm, and PSM filters
    pub const fn new(
        scoring: ScoringStrategy,
        method: InferenceMethod,
        filters: Vec<PsmFilter>,
    ) -> Self {
        Self {
            scoring,
            method,
            filters,
        }
    }

    /// The filters this engine applies
    pub fn filters(&self) -> &[PsmFilter] {
        &self.filters
    }

    /// Infer the protein groups. Every peptide that is left in the graph after filtering is
    /// evidence for at least one reported group (or one of its sub groups).
    pub fn infer(&self, mut graph: IntermediateGraph) -> Vec<InferredProteinGroup> {
        graph.apply_filters(&self.filters);

        let peptide_scores: Vec<Option<f64>> = graph
            .peptides()
            .iter()
            .map(|peptide| self.scoring.peptide.score(&peptide.psms))
            .collect();

        let mut grouped: IndexMap<&BTreeSet<usize>, Vec<usize>> = IndexMap::new();
        for (index, protein) in graph.proteins().iter().enumerate() {
            if !protein.peptides.is_empty() {
                grouped.entry(&protein.peptides).or_default().push(index);
            }
        }
        let candidates: Vec<Candidate> = grouped
            .into_iter()
            .map(|(peptides, proteins)| Candidate {
                score: self
                    .scoring
                    .protein
                    .combine(peptides.iter().filter_map(|p| peptide_scores[*p])),
                proteins,
                peptides: peptides.clone(),
            })
            .collect();

        let mut next_id = 1;
        let mut build = |candidate: &Candidate, sub_groups: Vec<InferredProteinGroup>| {
            let group = InferredProteinGroup {
                id: next_id,
                proteins: candidate
                    .proteins
                    .iter()
                    .map(|p| graph.proteins()[*p].id.clone())
                    .collect(),
                peptides: candidate
                    .peptides
                    .iter()
                    .map(|p| graph.peptides()[*p].id.clone())
                    .collect(),
                score: candidate.score,
                sub_groups,
            };
            next_id += 1;
            group
        };

        match self.method {
            InferenceMethod::ReportAll => candidates.iter().map(|c| build(c, Vec::new())).collect(),
            InferenceMethod::OccamsRazor => {
                let reported = self.occams_razor(&candidates);
                let reported_set: HashSet<usize> = reported.iter().copied().collect();
                let mut unassigned: Vec<usize> = (0..candidates.len())
                    .filter(|c| !reported_set.contains(c))
                    .collect();
                reported
                    .iter()
                    .map(|parent| {
                        // Candidates that are a subset of multiple reported groups go to the first
                        let (members, rest): (Vec<usize>, Vec<usize>) =
                            unassigned.iter().partition(|c| {
                                candidates[**c]
                                    .peptides
                                    .is_subset(&candidates[*parent].peptides)
                            });
                        unassigned = rest;
                        let sub_groups = nest(&candidates, members, &mut build);
                        build(&candidates[*parent], sub_groups)
                    })
                    .collect()
            }
        }
    }

    /// Greedy cover, returns the indices of the reported candidates in the order they were picked
    fn occams_razor(&self, candidates: &[Candidate]) -> Vec<usize> {
        let mut uncovered: BTreeSet<usize> = candidates
            .iter()
            .flat_map(|c| c.peptides.iter().copied())
            .collect();
        let mut reported = Vec::new();
        let mut is_reported = vec![false; candidates.len()];
        while !uncovered.is_empty() {
            let best = candidates
                .iter()
                .enumerate()
                .filter(|(index, _)| !is_reported[*index])
                .map(|(index, candidate)| {
                    let explained = candidate.peptides.intersection(&uncovered).count();
                    (
                        explained,
                        self.scoring.protein.rank_key(candidate.score),
                        std::cmp::Reverse(index),
                    )
                })
                .max();
            match best {
                Some((explained, _, std::cmp::Reverse(index))) if explained > 0 => {
                    is_reported[index] = true;
                    reported.push(index);
                    for peptide in &candidates[index].peptides {
                        uncovered.remove(peptide);
                    }
                }
                _ => break,
            }
        }
        reported
    }
}

/// Arrange the given candidates (all subsets of one parent) into a tree, a candidate that is a
/// subset of a bigger candidate becomes its sub group
fn nest(
    candidates: &[Candidate],
    mut members: Vec<usize>,
    build: &mut impl FnMut(&Candidate, Vec<InferredProteinGroup>) -> InferredProteinGroup,
) -> Vec<InferredProteinGroup> {
    // Biggest first, so every candidate is seen after all its possible parents
    members.sort_by_key(|m| std::cmp::Reverse(candidates[*m].peptides.len()));
    let mut tops: Vec<(usize, Vec<usize>)> = Vec::new();
    for member in members {
        if let Some((_, children)) = tops
            .iter_mut()
            .find(|(top, _)| candidates[member].peptides.is_subset(&candidates[*top].peptides))
        {
            children.push(member);
        } else {
            tops.push((member, Vec::new()));
        }
    }
    tops.into_iter()
        .map(|(top, children)| {
            let sub_groups = nest(candidates, children, &mut *build);
            build(&candidates[top], sub_groups)
        })
        .collect()
}

/// Run the full inference pipeline on a source: select the main score, choose the scoring, build
/// the intermediate graph, infer, and flatten the groups into a [`GroupMapping`].
/// # Errors
/// If the intermediate graph could not be built from the source.
pub fn infer_protein_groups(
    source: &dyn DataSource,
    settings: &InferenceSettings,
) -> Result<GroupMapping, BoxedError<'static, LoadErrorKind>> {
    let selected = select_main_score(&source.available_peptide_scores());
    let scoring = ScoringStrategy::choose(selected);
    let graph = IntermediateGraph::build(ControllerId::next(), source)?;
    tracing::debug!(
        controller = %graph.controller(),
        proteins = graph.proteins().len(),
        peptides = graph.peptides().len(),
        main_score = selected.map(|s| s.name),
        "Built intermediate structure"
    );
    let engine = InferenceEngine::new(scoring, settings.method, settings.filters.clone());
    let groups = engine.infer(graph);
    Ok(GroupMapping::build(&groups, !engine.filters().is_empty()))
}
