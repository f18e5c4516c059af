//! The intermediate protein ↔ peptide structure that protein inference works on.

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use context_error::*;
use indexmap::IndexMap;

use crate::{DataSource, LoadErrorKind, PeptideId, ProteinId, PsmFilter, PsmRecord};

/// Opaque identifier for the source a graph was built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(usize);

impl ControllerId {
    /// Hand out a fresh identifier, unique within this process
    pub fn next() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ControllerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A protein in the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinNode {
    /// The protein identifier
    pub id: ProteinId,
    /// Indices into [`IntermediateGraph::peptides`]
    pub peptides: BTreeSet<usize>,
}

/// A peptide in the graph, with all PSMs for it
#[derive(Debug, Clone, PartialEq)]
pub struct PeptideNode {
    /// The peptide identifier
    pub id: PeptideId,
    /// The amino acid sequence
    pub sequence: String,
    /// All PSMs
    pub psms: Vec<PsmRecord>,
    /// Indices into [`IntermediateGraph::proteins`]
    pub proteins: BTreeSet<usize>,
}

/// Bipartite graph of proteins and peptides, derived from a single source and owned by a single
/// inference run. Only peptides that map to at least one protein are part of the graph.
#[derive(Debug, Clone)]
pub struct IntermediateGraph {
    controller: ControllerId,
    proteins: Vec<ProteinNode>,
    peptides: Vec<PeptideNode>,
}

impl IntermediateGraph {
    /// Build the graph from all proteins and peptides in the given source. Proteins that are
    /// listed multiple times are merged.
    /// # Errors
    /// If the source could not deliver its proteins or peptides, or if a protein refers to a
    /// peptide that the source does not contain.
    pub fn build(
        controller: ControllerId,
        source: &dyn DataSource,
    ) -> Result<Self, BoxedError<'static, LoadErrorKind>> {
        let mut peptides: IndexMap<PeptideId, PeptideNode> = source
            .peptides()?
            .into_iter()
            .map(|peptide| {
                (
                    peptide.id.clone(),
                    PeptideNode {
                        id: peptide.id,
                        sequence: peptide.sequence,
                        psms: peptide.psms,
                        proteins: BTreeSet::new(),
                    },
                )
            })
            .collect();
        let mut proteins: IndexMap<ProteinId, BTreeSet<usize>> = IndexMap::new();
        for protein in source.proteins()? {
            let protein_index = proteins.get_index_of(&protein.id).unwrap_or(proteins.len());
            let mut linked = BTreeSet::new();
            for peptide in &protein.peptides {
                let (peptide_index, _, node) = peptides.get_full_mut(peptide).ok_or_else(|| {
                    BoxedError::new(
                        LoadErrorKind::InferenceFailure,
                        "Invalid protein peptide link",
                        format!(
                            "Protein '{}' refers to peptide '{peptide}' which is not present in graph {controller}",
                            protein.id
                        ),
                        Context::none(),
                    )
                })?;
                node.proteins.insert(protein_index);
                linked.insert(peptide_index);
            }
            proteins.entry(protein.id).or_default().extend(linked);
        }

        let mut graph = Self {
            controller,
            proteins: proteins
                .into_iter()
                .map(|(id, peptides)| ProteinNode { id, peptides })
                .collect(),
            peptides: peptides.into_values().collect(),
        };
        graph.prune();
        Ok(graph)
    }

    /// The source this graph was built from
    pub const fn controller(&self) -> ControllerId {
        self.controller
    }

    /// All proteins, including proteins without any remaining peptide
    pub fn proteins(&self) -> &[ProteinNode] {
        &self.proteins
    }

    /// All peptides, every peptide maps to at least one protein
    pub fn peptides(&self) -> &[PeptideNode] {
        &self.peptides
    }

    /// Remove all PSMs that do not pass all filters, peptides that are left without PSMs are
    /// removed from the graph. Without filters the graph is left untouched.
    pub fn apply_filters(&mut self, filters: &[PsmFilter]) {
        if filters.is_empty() {
            return;
        }
        for peptide in &mut self.peptides {
            let sequence = &peptide.sequence;
            peptide
                .psms
                .retain(|psm| filters.iter().all(|filter| filter.passes(sequence, psm)));
            if peptide.psms.is_empty() {
                peptide.proteins.clear();
            }
        }
        self.prune();
    }

    /// Drop all peptides without proteins and renumber the links
    fn prune(&mut self) {
        let mut new_index = vec![None; self.peptides.len()];
        let mut next = 0;
        for (index, peptide) in self.peptides.iter().enumerate() {
            if !peptide.proteins.is_empty() {
                new_index[index] = Some(next);
                next += 1;
            }
        }
        self.peptides.retain(|peptide| !peptide.proteins.is_empty());
        for protein in &mut self.proteins {
            protein.peptides = protein
                .peptides
                .iter()
                .filter_map(|index| new_index[*index])
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Curie, PeptideRecord, ProteinRecord, curie};

    #[derive(Debug)]
    struct Listing {
        proteins: Vec<ProteinRecord>,
        peptides: Vec<PeptideRecord>,
    }

    impl DataSource for Listing {
        fn available_peptide_scores(&self) -> Vec<Curie> {
            vec![curie!(MS:1001171)]
        }
        fn proteins(&self) -> Result<Vec<ProteinRecord>, BoxedError<'static, LoadErrorKind>> {
            Ok(self.proteins.clone())
        }
        fn peptides(&self) -> Result<Vec<PeptideRecord>, BoxedError<'static, LoadErrorKind>> {
            Ok(self.peptides.clone())
        }
    }

    fn protein(id: &str, peptides: &[&str]) -> ProteinRecord {
        ProteinRecord {
            id: id.to_string(),
            peptides: peptides.iter().map(ToString::to_string).collect(),
        }
    }

    fn peptide(id: &str, sequence: &str, score: f64) -> PeptideRecord {
        PeptideRecord {
            id: id.to_string(),
            sequence: sequence.to_string(),
            psms: vec![PsmRecord {
                id: format!("{id}_psm"),
                scores: vec![(curie!(MS:1001171), score)],
            }],
        }
    }

    #[test]
    fn build_links_and_drops_orphans() {
        let source = Listing {
            proteins: vec![
                protein("P1", &["pep1", "pep2"]),
                protein("P2", &["pep1"]),
                protein("P1", &["pep3"]),
            ],
            peptides: vec![
                peptide("pep1", "PEPTIDE", 30.0),
                peptide("orphan", "AAAAK", 12.0),
                peptide("pep2", "PEPTIDEK", 40.0),
                peptide("pep3", "ELVISK", 20.0),
            ],
        };
        let graph = IntermediateGraph::build(ControllerId::next(), &source).unwrap();
        assert_eq!(graph.proteins().len(), 2);
        assert_eq!(graph.peptides().len(), 3);
        assert!(graph.peptides().iter().all(|p| p.id != "orphan"));
        let p1 = &graph.proteins()[0];
        assert_eq!(p1.id, "P1");
        let p1_peptides: Vec<_> = p1
            .peptides
            .iter()
            .map(|i| graph.peptides()[*i].id.as_str())
            .collect();
        assert_eq!(p1_peptides, ["pep1", "pep2", "pep3"]);
        let shared = graph.peptides().iter().find(|p| p.id == "pep1").unwrap();
        assert_eq!(shared.proteins.len(), 2);
    }

    #[test]
    fn unknown_peptide_is_an_error() {
        let source = Listing {
            proteins: vec![protein("P1", &["missing"])],
            peptides: vec![peptide("pep1", "PEPTIDE", 30.0)],
        };
        assert!(IntermediateGraph::build(ControllerId::next(), &source).is_err());
    }

    #[test]
    fn filters_remove_peptides() {
        let source = Listing {
            proteins: vec![protein("P1", &["pep1", "pep2"]), protein("P2", &["pep2"])],
            peptides: vec![peptide("pep1", "PEPTIDE", 30.0), peptide("pep2", "PEPK", 10.0)],
        };
        let mut graph = IntermediateGraph::build(ControllerId::next(), &source).unwrap();
        graph.apply_filters(&[PsmFilter::ScoreAtLeast {
            accession: curie!(MS:1001171),
            threshold: 20.0,
        }]);
        assert_eq!(graph.peptides().len(), 1);
        assert_eq!(graph.proteins()[0].peptides.len(), 1);
        assert!(graph.proteins()[1].peptides.is_empty());
    }
}
