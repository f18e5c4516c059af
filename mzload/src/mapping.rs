//! The flattened group → protein → evidence mapping attached to a handle.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{InferredProteinGroup, PeptideId, ProteinId};

/// The peptide evidence that is kept for a protein in a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeptideEvidence {
    /// No filter was applied, all peptides (and PSMs) of the protein are evidence
    All,
    /// Only these peptides passed the filters
    Only(Vec<PeptideId>),
}

/// Group identifier → protein identifier → peptide evidence, the result of protein inference that
/// is attached to a data source handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping(BTreeMap<usize, BTreeMap<ProteinId, PeptideEvidence>>);

impl GroupMapping {
    /// Flatten inferred groups. Each group maps its own proteins and the proteins of its direct
    /// sub groups, deeper sub groups are not included. When `filtered` is false every protein
    /// maps to [`PeptideEvidence::All`], otherwise to the peptides of the (sub) group it came
    /// from.
    pub fn build(groups: &[InferredProteinGroup], filtered: bool) -> Self {
        Self(
            groups
                .iter()
                .map(|group| {
                    let proteins = group_members(group)
                        .into_iter()
                        .map(|(protein, peptides)| {
                            let evidence = if filtered {
                                PeptideEvidence::Only(peptides.iter().cloned().collect())
                            } else {
                                PeptideEvidence::All
                            };
                            (protein.clone(), evidence)
                        })
                        .collect();
                    (group.id, proteins)
                })
                .collect(),
        )
    }

    /// The number of groups
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no groups
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the proteins of a group
    pub fn get(&self, group: usize) -> Option<&BTreeMap<ProteinId, PeptideEvidence>> {
        self.0.get(&group)
    }

    /// Iterate over all groups
    pub fn iter(&self) -> impl Iterator<Item = (&usize, &BTreeMap<ProteinId, PeptideEvidence>)> {
        self.0.iter()
    }

    /// All proteins over all groups
    pub fn proteins(&self) -> BTreeSet<&ProteinId> {
        self.0.values().flat_map(BTreeMap::keys).collect()
    }
}

/// The proteins of a group together with the proteins of its direct sub groups
pub fn group_proteins(group: &InferredProteinGroup) -> BTreeSet<&ProteinId> {
    group_members(group).into_keys().collect()
}

/// Every protein with the peptides of the (sub) group it is a member of, a protein that is in
/// both the group and a sub group keeps the peptides of the group
fn group_members(group: &InferredProteinGroup) -> BTreeMap<&ProteinId, &BTreeSet<PeptideId>> {
    let mut members: BTreeMap<&ProteinId, &BTreeSet<PeptideId>> = group
        .proteins
        .iter()
        .map(|protein| (protein, &group.peptides))
        .collect();
    for sub_group in &group.sub_groups {
        for protein in &sub_group.proteins {
            members.entry(protein).or_insert(&sub_group.peptides);
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(
        id: usize,
        proteins: &[&str],
        peptides: &[&str],
        sub_groups: Vec<InferredProteinGroup>,
    ) -> InferredProteinGroup {
        InferredProteinGroup {
            id,
            proteins: proteins.iter().map(ToString::to_string).collect(),
            peptides: peptides.iter().map(ToString::to_string).collect(),
            score: None,
            sub_groups,
        }
    }

    #[test]
    fn shared_peptide_maps_both_proteins() {
        let groups = [group(
            1,
            &["P1"],
            &["pep1", "pep2"],
            vec![group(2, &["P2"], &["pep1"], Vec::new())],
        )];
        let mapping = GroupMapping::build(&groups, false);
        assert_eq!(mapping.len(), 1);
        let proteins = mapping.get(1).unwrap();
        assert_eq!(proteins.len(), 2);
        assert_eq!(proteins["P1"], PeptideEvidence::All);
        assert_eq!(proteins["P2"], PeptideEvidence::All);
    }

    #[test]
    fn only_direct_sub_groups_are_flattened() {
        let deep = group(3, &["P3"], &["a"], Vec::new());
        let groups = [group(
            1,
            &["P1"],
            &["a", "b", "c"],
            vec![group(2, &["P2"], &["a", "b"], vec![deep])],
        )];
        let flat: Vec<&str> = group_proteins(&groups[0])
            .into_iter()
            .map(String::as_str)
            .collect();
        assert_eq!(flat, ["P1", "P2"]);
        assert!(
            GroupMapping::build(&groups, false)
                .proteins()
                .iter()
                .all(|protein| protein.as_str() != "P3")
        );
    }

    #[test]
    fn filtered_mapping_lists_peptides() {
        let groups = [group(
            7,
            &["P1"],
            &["pep1", "pep2"],
            vec![group(8, &["P2", "P1"], &["pep1"], Vec::new())],
        )];
        let mapping = GroupMapping::build(&groups, true);
        let proteins = mapping.get(7).unwrap();
        assert_eq!(
            proteins["P1"],
            PeptideEvidence::Only(vec!["pep1".to_string(), "pep2".to_string()])
        );
        assert_eq!(proteins["P2"], PeptideEvidence::Only(vec!["pep1".to_string()]));
    }

    #[test]
    fn serialises() {
        let groups = [group(1, &["P1"], &["pep1"], Vec::new())];
        let json = serde_json::to_string(&GroupMapping::build(&groups, false)).unwrap();
        assert_eq!(json, r#"{"1":{"P1":"All"}}"#);
    }
}
