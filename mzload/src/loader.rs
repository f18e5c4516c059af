//! Loading data sources in the background.
//!
//! A load goes through these steps:
//! 1. Look for a handle with the same origin. An active handle is brought to the foreground, a
//!    placeholder means the file is still loading. In both cases nothing else happens.
//! 2. Register a placeholder, so the rest of the system can see that the file is loading.
//! 3. Check for cancellation and construct the format specific data source.
//! 4. Associate auxiliary spectra files (multi file formats only), failures here are logged and
//!    do not stop the load.
//! 5. Run protein inference if that was requested and the format supports it.
//! 6. Check for cancellation and swap the placeholder for the constructed handle, or remove the
//!    placeholder if the load was cancelled or failed.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use context_error::*;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    DataSource, DataSourceHandle, FormatKind, InferenceSettings, LifecycleState, LoadErrorKind,
    SharedRegistry, error::load_error, infer_protein_groups, lock_registry,
};

/// A request to open a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    /// The file to open, this is the identity of the resulting handle
    pub origin: PathBuf,
    /// Spectra files that belong to the file, in order
    pub auxiliary_files: Vec<PathBuf>,
    /// Load the full content in memory instead of indexed access
    pub load_eagerly: bool,
    /// Run protein inference before the handle becomes visible
    pub defer_inference: bool,
    /// The format, if not set this is guessed from the file name
    pub format: Option<FormatKind>,
}

impl LoadRequest {
    /// A lazy load of the given file without inference
    pub fn new(origin: impl Into<PathBuf>) -> Self {
        Self {
            origin: origin.into(),
            auxiliary_files: Vec::new(),
            load_eagerly: false,
            defer_inference: false,
            format: None,
        }
    }

    /// Set the auxiliary spectra files
    #[must_use]
    pub fn auxiliary_files(self, files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            auxiliary_files: files.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Load the full file in memory
    #[must_use]
    pub fn eager(self, load_eagerly: bool) -> Self {
        Self {
            load_eagerly,
            ..self
        }
    }

    /// Run protein inference while loading
    #[must_use]
    pub fn defer_inference(self, defer_inference: bool) -> Self {
        Self {
            defer_inference,
            ..self
        }
    }

    /// Set the format instead of guessing it from the file name
    #[must_use]
    pub fn format(self, format: FormatKind) -> Self {
        Self {
            format: Some(format),
            ..self
        }
    }

    /// The format of the file
    pub fn format_kind(&self) -> FormatKind {
        self.format
            .unwrap_or_else(|| FormatKind::from_path(&self.origin))
    }
}

/// Settings shared by all loads of a [`Loader`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {
    /// How protein inference is run when a request asks for it
    pub inference: InferenceSettings,
}

/// Cooperative cancellation of a load, the loader checks this right before constructing the
/// data source and right before committing the handle
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation, all clones of this token see this
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An auxiliary file that was matched to a spectra descriptor of a data source
#[derive(Debug, Clone)]
pub struct AuxiliaryFile {
    /// The file
    pub path: PathBuf,
    /// The active handle for this file, if it was already open
    pub open_handle: Option<Arc<DataSourceHandle>>,
}

/// The format specific capability to construct data sources
pub trait SourceFactory: std::fmt::Debug + Send + Sync {
    /// Construct the data source for a file. When `defer_inference` is set the source has to be
    /// built in a state that allows protein inference right after construction.
    /// # Errors
    /// If the file could not be opened or parsed.
    fn construct(
        &self,
        origin: &Path,
        eager: bool,
        defer_inference: bool,
    ) -> Result<Box<dyn DataSource>, BoxedError<'static, LoadErrorKind>>;

    /// If this format can run protein inference during construction
    fn supports_deferred_inference(&self) -> bool {
        false
    }

    /// If this format refers to auxiliary spectra files
    fn supports_auxiliary_files(&self) -> bool {
        false
    }

    /// Attach the matched auxiliary files (keyed on spectra descriptor id) to the source
    /// # Errors
    /// If the files could not be used by this source.
    fn associate_auxiliary(
        &self,
        _source: &mut dyn DataSource,
        _files: &BTreeMap<String, AuxiliaryFile>,
    ) -> Result<(), BoxedError<'static, LoadErrorKind>> {
        Ok(())
    }
}

/// The construction capabilities per format
#[derive(Debug, Clone, Default)]
pub struct FactoryTable(BTreeMap<FormatKind, Arc<dyn SourceFactory>>);

impl FactoryTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a format, replacing any previous one
    #[must_use]
    pub fn with(mut self, format: FormatKind, factory: impl SourceFactory + 'static) -> Self {
        self.0.insert(format, Arc::new(factory));
        self
    }

    /// Get the factory for a format
    pub fn get(&self, format: FormatKind) -> Option<&Arc<dyn SourceFactory>> {
        self.0.get(&format)
    }
}

/// The result of a single load
#[derive(Debug)]
pub enum LoadOutcome {
    /// The file was already open, it is now the foreground handle
    AlreadyOpen,
    /// The file is being loaded by another request
    InProgress,
    /// The file was loaded and its handle is active
    Loaded(Arc<DataSourceHandle>),
    /// The load was cancelled, nothing is registered for the file
    Cancelled,
    /// The load failed, nothing is registered for the file
    Failed(BoxedError<'static, LoadErrorKind>),
}

/// Why a load stopped before committing
enum Abort {
    Cancelled,
    Failed(BoxedError<'static, LoadErrorKind>),
}

impl From<BoxedError<'static, LoadErrorKind>> for Abort {
    fn from(error: BoxedError<'static, LoadErrorKind>) -> Self {
        Self::Failed(error)
    }
}

/// Removes the placeholder from the registry when dropped, unless the load was committed
struct PlaceholderGuard {
    registry: SharedRegistry,
    placeholder: Arc<DataSourceHandle>,
    committed: bool,
}

impl PlaceholderGuard {
    fn commit(
        mut self,
        handle: DataSourceHandle,
    ) -> Result<Arc<DataSourceHandle>, BoxedError<'static, LoadErrorKind>> {
        let active = handle.activate()?;
        let active = lock_registry(&self.registry).replace(&self.placeholder, active)?;
        self.committed = true;
        Ok(active)
    }
}

impl Drop for PlaceholderGuard {
    fn drop(&mut self) {
        if !self.committed && lock_registry(&self.registry).remove(&self.placeholder) {
            debug!(origin = %self.placeholder.origin().display(), "Removed placeholder");
        }
    }
}

/// Loads data sources into a shared registry, see the [module documentation](self)
#[derive(Debug)]
pub struct Loader {
    registry: SharedRegistry,
    factories: FactoryTable,
    settings: LoadSettings,
    progress: Option<Sender<String>>,
}

impl Loader {
    /// Create a loader with default settings
    pub fn new(registry: SharedRegistry, factories: FactoryTable) -> Self {
        Self {
            registry,
            factories,
            settings: LoadSettings::default(),
            progress: None,
        }
    }

    /// Use these settings
    #[must_use]
    pub fn with_settings(self, settings: LoadSettings) -> Self {
        Self { settings, ..self }
    }

    /// Send progress notifications to this channel
    #[must_use]
    pub fn with_progress(self, progress: Sender<String>) -> Self {
        Self {
            progress: Some(progress),
            ..self
        }
    }

    /// The registry this loader loads into
    pub const fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Load on a dedicated worker thread
    pub fn spawn(self: &Arc<Self>, request: LoadRequest) -> LoadTask {
        let cancel = CancellationToken::new();
        let loader = Arc::clone(self);
        let token = cancel.clone();
        let origin = request.origin.clone();
        let worker = std::thread::spawn(move || loader.load(&request, &token));
        LoadTask {
            origin,
            cancel,
            worker,
        }
    }

    /// Load the file on the current thread. Failures are logged and reported in the outcome, the
    /// registry never keeps a placeholder for a failed or cancelled load.
    pub fn load(&self, request: &LoadRequest, cancel: &CancellationToken) -> LoadOutcome {
        let origin = request.origin.display();
        let format = request.format_kind();

        // Check and insert under one lock so two requests for the same file cannot both load it
        let placeholder = {
            let mut registry = lock_registry(&self.registry);
            if let Some(existing) = registry.find_by_origin(&request.origin) {
                return if existing.state() == LifecycleState::Active {
                    registry.set_foreground(&existing);
                    info!(%origin, "File already open");
                    LoadOutcome::AlreadyOpen
                } else {
                    info!(%origin, "File is already being loaded");
                    LoadOutcome::InProgress
                };
            }
            match registry.insert_placeholder(DataSourceHandle::placeholder(
                request.origin.clone(),
                format,
            )) {
                Ok(placeholder) => placeholder,
                Err(err) => {
                    error!(%origin, error = %err, "Could not register placeholder");
                    return LoadOutcome::Failed(err);
                }
            }
        };
        let guard = PlaceholderGuard {
            registry: Arc::clone(&self.registry),
            placeholder,
            committed: false,
        };

        let handle = match self.construct(request, format, cancel) {
            Ok(handle) => handle,
            Err(Abort::Cancelled) => {
                warn!(%origin, "File loading has been interrupted");
                return LoadOutcome::Cancelled;
            }
            Err(Abort::Failed(err)) => {
                error!(%origin, error = %err, "Failed to load from the file");
                return LoadOutcome::Failed(err);
            }
        };

        if cancel.is_cancelled() {
            let closed = handle.close();
            warn!(%origin, state = ?closed.state(), "File loading has been interrupted");
            return LoadOutcome::Cancelled;
        }

        match guard.commit(handle) {
            Ok(active) => {
                info!(
                    %origin,
                    groups = active.inferred_groups().map(crate::GroupMapping::len),
                    "Loaded file"
                );
                LoadOutcome::Loaded(active)
            }
            Err(err) => {
                error!(%origin, error = %err, "Failed to register the loaded file");
                LoadOutcome::Failed(err)
            }
        }
    }

    fn construct(
        &self,
        request: &LoadRequest,
        format: FormatKind,
        cancel: &CancellationToken,
    ) -> Result<DataSourceHandle, Abort> {
        if cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        self.notify(format!("Loading {}", request.origin.display()));

        let factory = self.factories.get(format).ok_or_else(|| {
            load_error(
                LoadErrorKind::MissingFactory,
                "Unsupported file format",
                format!("There is no way to open {format} files"),
                &request.origin,
            )
        })?;
        let infer = request.defer_inference && factory.supports_deferred_inference();
        let source = factory.construct(&request.origin, request.load_eagerly, infer)?;
        let mut handle = DataSourceHandle::constructed(request.origin.clone(), format, source);

        if factory.supports_auxiliary_files() && !request.auxiliary_files.is_empty() {
            if let Err(err) =
                self.associate_auxiliary(&mut handle, factory.as_ref(), &request.auxiliary_files)
            {
                warn!(
                    origin = %request.origin.display(),
                    error = %err,
                    "Failed to check the files as auxiliary files"
                );
            }
        }

        if infer {
            let source = handle.source().ok_or_else(|| {
                load_error(
                    LoadErrorKind::InferenceFailure,
                    "Cannot infer proteins",
                    "The constructed handle has no data",
                    &request.origin,
                )
            })?;
            let groups = infer_protein_groups(source, &self.settings.inference)?;
            handle.set_inferred_groups(groups)?;
        } else if request.defer_inference {
            info!(
                origin = %request.origin.display(),
                %format,
                "Protein inference during loading is not supported for this format"
            );
        }
        Ok(handle)
    }

    /// Match every auxiliary file to a spectra descriptor of the source, all files have to match
    fn associate_auxiliary(
        &self,
        handle: &mut DataSourceHandle,
        factory: &dyn SourceFactory,
        files: &[PathBuf],
    ) -> Result<(), BoxedError<'static, LoadErrorKind>> {
        let origin = handle.origin().to_path_buf();
        let descriptors = handle
            .source()
            .map(|source| source.spectra_data())
            .unwrap_or_default();
        let mut matched = BTreeMap::new();
        for file in files {
            let descriptor = descriptors
                .iter()
                .find(|descriptor| descriptor.matches(file))
                .ok_or_else(|| {
                    load_error(
                        LoadErrorKind::AuxiliaryAssociationFailure,
                        "Unknown auxiliary file",
                        format!(
                            "'{}' is not one of the spectra files referenced by this file",
                            file.display()
                        ),
                        &origin,
                    )
                })?;
            let open_handle = lock_registry(&self.registry)
                .find_by_origin(file)
                .filter(|handle| handle.state() == LifecycleState::Active);
            matched.insert(
                descriptor.id.clone(),
                AuxiliaryFile {
                    path: file.clone(),
                    open_handle,
                },
            );
        }
        if let Some(source) = handle.source_mut() {
            factory.associate_auxiliary(source, &matched)?;
        }
        handle.set_auxiliary_files(
            matched
                .into_iter()
                .map(|(id, file)| (id, file.path))
                .collect(),
        )
    }

    fn notify(&self, message: String) {
        if let Some(progress) = &self.progress {
            // The receiver may be gone, progress is best effort
            progress.send(message).ok();
        }
    }
}

/// A load running on its own worker thread
#[derive(Debug)]
pub struct LoadTask {
    origin: PathBuf,
    cancel: CancellationToken,
    worker: JoinHandle<LoadOutcome>,
}

impl LoadTask {
    /// The file being loaded
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Request cancellation, this has no effect once the handle is committed
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if the worker is done
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the load to finish
    pub fn join(self) -> LoadOutcome {
        self.worker.join().unwrap_or_else(|_| {
            error!(origin = %self.origin.display(), "Load worker panicked");
            LoadOutcome::Failed(load_error(
                LoadErrorKind::ConstructionFailure,
                "Failed to load from the file",
                "The load worker panicked",
                &self.origin,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, atomic::AtomicUsize};

    use super::*;
    use crate::{InMemoryRegistry, PeptideRecord, ProteinRecord, RegistryEvent, SourceRegistry};

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

    /// Counts constructions, and optionally cancels the given token while constructing
    #[derive(Debug, Default)]
    struct Counting {
        calls: Arc<AtomicUsize>,
        cancel_during: Option<CancellationToken>,
    }

    impl SourceFactory for Counting {
        fn construct(
            &self,
            _origin: &Path,
            _eager: bool,
            _defer_inference: bool,
        ) -> Result<Box<dyn DataSource>, BoxedError<'static, LoadErrorKind>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_during {
                token.cancel();
            }
            Ok(Box::new(Empty))
        }
    }

    fn setup(factory: Counting) -> (Arc<Mutex<InMemoryRegistry>>, Loader) {
        let registry = InMemoryRegistry::recording().shared();
        let shared: SharedRegistry = registry.clone();
        let loader = Loader::new(
            shared,
            FactoryTable::new().with(FormatKind::IndexedXML, factory),
        );
        (registry, loader)
    }

    #[test]
    fn request_builder() {
        let request = LoadRequest::new("data/run.mzML.gz")
            .auxiliary_files(["a.mgf"])
            .eager(true)
            .defer_inference(true);
        assert_eq!(request.format_kind(), FormatKind::IndexedXML);
        assert_eq!(request.auxiliary_files, [PathBuf::from("a.mgf")]);
        assert!(request.load_eagerly && request.defer_inference);
        assert_eq!(
            request.format(FormatKind::Other).format_kind(),
            FormatKind::Other
        );
    }

    #[test]
    fn cancelled_before_construction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (registry, loader) = setup(Counting {
            calls: calls.clone(),
            cancel_during: None,
        });
        let token = CancellationToken::new();
        token.cancel();
        let outcome = loader.load(&LoadRequest::new("a.xml"), &token);
        assert!(matches!(outcome, LoadOutcome::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let registry = registry.lock().unwrap();
        assert!(registry.is_empty());
        assert_eq!(
            registry.events().last(),
            Some(&RegistryEvent::Removed(PathBuf::from("a.xml")))
        );
    }

    #[test]
    fn cancelled_before_commit() {
        let token = CancellationToken::new();
        let (registry, loader) = setup(Counting {
            calls: Arc::default(),
            cancel_during: Some(token.clone()),
        });
        let outcome = loader.load(&LoadRequest::new("a.xml"), &token);
        assert!(matches!(outcome, LoadOutcome::Cancelled));
        let registry = registry.lock().unwrap();
        assert!(registry.is_empty());
        assert!(
            registry
                .events()
                .iter()
                .all(|event| !matches!(event, RegistryEvent::Replaced(..)))
        );
    }

    #[test]
    fn missing_factory() {
        let (registry, loader) = setup(Counting::default());
        let outcome = loader.load(&LoadRequest::new("a.mzid"), &CancellationToken::new());
        let LoadOutcome::Failed(error) = outcome else {
            panic!("Expected a failure, got {outcome:?}");
        };
        assert_eq!(error.get_kind(), &LoadErrorKind::MissingFactory);
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn second_load_brings_to_foreground() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (registry, loader) = setup(Counting {
            calls: calls.clone(),
            cancel_during: None,
        });
        let token = CancellationToken::new();
        assert!(matches!(
            loader.load(&LoadRequest::new("a.xml"), &token),
            LoadOutcome::Loaded(_)
        ));
        assert!(matches!(
            loader.load(&LoadRequest::new("b.xml"), &token),
            LoadOutcome::Loaded(_)
        ));
        assert!(matches!(
            loader.load(&LoadRequest::new("a.xml"), &token),
            LoadOutcome::AlreadyOpen
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let registry = registry.lock().unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.foreground().unwrap().origin(),
            Path::new("a.xml")
        );
    }

    #[test]
    fn placeholder_means_in_progress() {
        let (registry, loader) = setup(Counting::default());
        registry
            .lock()
            .unwrap()
            .insert_placeholder(DataSourceHandle::placeholder(
                "a.xml",
                FormatKind::IndexedXML,
            ))
            .unwrap();
        assert!(matches!(
            loader.load(&LoadRequest::new("a.xml"), &CancellationToken::new()),
            LoadOutcome::InProgress
        ));
        assert!(
            registry
                .lock()
                .unwrap()
                .find_by_origin(Path::new("a.xml"))
                .unwrap()
                .is_placeholder()
        );
    }
}
