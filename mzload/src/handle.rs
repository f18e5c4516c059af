//! Handles for opened (or opening) files and their lifecycle.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use context_error::BoxedError;
use serde::{Deserialize, Serialize};

use crate::{DataSource, GroupMapping, LoadErrorKind, error::load_error};

/// The broad kind of file behind a handle, used to pick the construction capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormatKind {
    /// Single XML files accessed through an index (PRIDE XML, mzML)
    IndexedXML,
    /// Graph based multi file formats (mzIdentML, which refers to separate spectra files)
    GraphBased,
    /// Anything else
    Other,
}

impl FormatKind {
    /// Guess the format from the file name, gzipped files are judged by their inner extension
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        match Path::new(name).extension().and_then(|ext| ext.to_str()) {
            Some("mzid" | "mzidentml") => Self::GraphBased,
            Some("xml" | "mzml") => Self::IndexedXML,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::IndexedXML => "indexed XML",
                Self::GraphBased => "graph based",
                Self::Other => "other",
            }
        )
    }
}

/// The lifecycle of a handle: `Placeholder` → `Active` on commit, `Placeholder` → `Closed` on rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Registered while loading, not yet (fully) constructed
    Placeholder,
    /// Fully constructed and visible to the rest of the system
    Active,
    /// Discarded, the parsed data is released
    Closed,
}

/// An opened (or opening) file. Two handles with the same origin are the same logical source,
/// equality only looks at the origin.
#[derive(Debug)]
pub struct DataSourceHandle {
    origin: PathBuf,
    format: FormatKind,
    state: LifecycleState,
    source: Option<Box<dyn DataSource>>,
    auxiliary_files: BTreeMap<String, PathBuf>,
    inferred_groups: Option<GroupMapping>,
}

impl DataSourceHandle {
    /// A placeholder that only knows its origin and a best guess for the format
    pub fn placeholder(origin: impl Into<PathBuf>, format: FormatKind) -> Self {
        Self {
            origin: origin.into(),
            format,
            state: LifecycleState::Placeholder,
            source: None,
            auxiliary_files: BTreeMap::new(),
            inferred_groups: None,
        }
    }

    /// A constructed handle, it stays in the placeholder state until it is activated
    pub fn constructed(
        origin: impl Into<PathBuf>,
        format: FormatKind,
        source: Box<dyn DataSource>,
    ) -> Self {
        Self {
            source: Some(source),
            ..Self::placeholder(origin, format)
        }
    }

    /// The file this handle was opened from
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// The format of the file
    pub const fn format(&self) -> FormatKind {
        self.format
    }

    /// The lifecycle state
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Check if this handle is still a placeholder
    pub fn is_placeholder(&self) -> bool {
        self.state == LifecycleState::Placeholder
    }

    /// The parsed data, `None` for bare placeholders and closed handles
    pub fn source(&self) -> Option<&dyn DataSource> {
        self.source.as_deref()
    }

    /// Mutable access to the parsed data
    pub fn source_mut(&mut self) -> Option<&mut (dyn DataSource + 'static)> {
        self.source.as_deref_mut()
    }

    /// The auxiliary files associated with this handle, keyed on the spectra descriptor id
    pub const fn auxiliary_files(&self) -> &BTreeMap<String, PathBuf> {
        &self.auxiliary_files
    }

    /// Associate auxiliary files, only possible while this is a placeholder
    /// # Errors
    /// If the handle is not a placeholder anymore.
    pub fn set_auxiliary_files(
        &mut self,
        files: BTreeMap<String, PathBuf>,
    ) -> Result<(), BoxedError<'static, LoadErrorKind>> {
        self.expect_placeholder("Cannot associate auxiliary files")?;
        self.auxiliary_files = files;
        Ok(())
    }

    /// The inferred protein groups, only set if the inference ran during loading
    pub const fn inferred_groups(&self) -> Option<&GroupMapping> {
        self.inferred_groups.as_ref()
    }

    /// Attach the inferred protein groups. This can happen once, and only before the handle is
    /// activated, so no partially inferred handle is ever visible.
    /// # Errors
    /// If the handle is not a placeholder or already has inferred groups.
    pub fn set_inferred_groups(
        &mut self,
        groups: GroupMapping,
    ) -> Result<(), BoxedError<'static, LoadErrorKind>> {
        self.expect_placeholder("Cannot attach inferred protein groups")?;
        if self.inferred_groups.is_some() {
            return Err(load_error(
                LoadErrorKind::InvalidState,
                "Cannot attach inferred protein groups",
                "The protein groups were already inferred for this file",
                &self.origin,
            ));
        }
        self.inferred_groups = Some(groups);
        Ok(())
    }

    /// Make this handle visible to the rest of the system
    /// # Errors
    /// If the handle is not a placeholder or has no parsed data.
    pub fn activate(mut self) -> Result<Self, BoxedError<'static, LoadErrorKind>> {
        self.expect_placeholder("Cannot activate handle")?;
        if self.source.is_none() {
            return Err(load_error(
                LoadErrorKind::InvalidState,
                "Cannot activate handle",
                "A placeholder without parsed data cannot become active",
                &self.origin,
            ));
        }
        self.state = LifecycleState::Active;
        Ok(self)
    }

    /// Close this handle, this releases the parsed data
    #[must_use]
    pub fn close(mut self) -> Self {
        self.state = LifecycleState::Closed;
        self.source = None;
        self
    }

    fn expect_placeholder(
        &self,
        short_description: &'static str,
    ) -> Result<(), BoxedError<'static, LoadErrorKind>> {
        if self.is_placeholder() {
            Ok(())
        } else {
            Err(load_error(
                LoadErrorKind::InvalidState,
                short_description,
                format!("The handle is {:?}, not a placeholder", self.state),
                &self.origin,
            ))
        }
    }
}

impl PartialEq for DataSourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
    }
}

impl Eq for DataSourceHandle {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PeptideRecord, ProteinRecord};

    #[derive(Debug)]
    struct Empty;

    impl DataSource for Empty {
        fn available_peptide_scores(&self) -> Vec<crate::Curie> {
            Vec::new()
        }
        fn proteins(&self) -> Result<Vec<ProteinRecord>, BoxedError<'static, LoadErrorKind>> {
            Ok(Vec::new())
        }
        fn peptides(&self) -> Result<Vec<PeptideRecord>, BoxedError<'static, LoadErrorKind>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn format_guess() {
        assert_eq!(FormatKind::from_path("a/b/sample.mzid"), FormatKind::GraphBased);
        assert_eq!(FormatKind::from_path("sample.mzIdentML.gz"), FormatKind::GraphBased);
        assert_eq!(FormatKind::from_path("PRIDE_Exp_1.xml"), FormatKind::IndexedXML);
        assert_eq!(FormatKind::from_path("run.mzML.gz"), FormatKind::IndexedXML);
        assert_eq!(FormatKind::from_path("psms.tsv"), FormatKind::Other);
        assert_eq!(FormatKind::from_path("no_extension"), FormatKind::Other);
    }

    #[test]
    fn lifecycle() {
        let placeholder = DataSourceHandle::placeholder("sample.mzid", FormatKind::GraphBased);
        assert!(placeholder.activate().is_err());

        let mut handle =
            DataSourceHandle::constructed("sample.mzid", FormatKind::GraphBased, Box::new(Empty));
        handle.set_inferred_groups(GroupMapping::default()).unwrap();
        assert!(handle.set_inferred_groups(GroupMapping::default()).is_err());
        let mut active = handle.activate().unwrap();
        assert_eq!(active.state(), LifecycleState::Active);
        assert!(active.set_auxiliary_files(BTreeMap::new()).is_err());
        assert!(active.activate().is_err());
    }

    #[test]
    fn identity_is_origin() {
        let a = DataSourceHandle::placeholder("sample.mzid", FormatKind::GraphBased);
        let b = DataSourceHandle::constructed("sample.mzid", FormatKind::Other, Box::new(Empty))
            .close();
        assert_eq!(a, b);
        assert_eq!(b.state(), LifecycleState::Closed);
        assert!(b.source().is_none());
    }
}
