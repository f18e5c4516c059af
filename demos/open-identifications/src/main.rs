//! Open identification files in the background and show the inferred protein groups
//!
//! The files are tab separated with one PSM per line:
//! `protein<TAB>peptide<TAB>sequence<TAB>psm<TAB>MS:1002052=1e-10;MS:1002049=120`

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::{Parser, ValueEnum};
use context_error::*;
use mzload::{
    Curie, DataSource, FactoryTable, FormatKind, InMemoryRegistry, InferenceMethod,
    InferenceSettings, LoadErrorKind, LoadOutcome, LoadRequest, LoadSettings, Loader,
    PeptideRecord, ProteinRecord, PsmFilter, PsmRecord, SharedRegistry, SourceFactory,
    lock_registry,
};
use tracing::{info, warn};

/// The command line interface arguments
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Parser)]
struct Cli {
    /// The input files
    #[arg(short, long, required = true)]
    in_path: Vec<PathBuf>,
    /// Load the full files in memory
    #[arg(long)]
    in_memory: bool,
    /// Infer the protein groups while loading
    #[arg(long)]
    infer: bool,
    /// The inference algorithm
    #[arg(long, value_enum, default_value = "occams-razor")]
    method: Method,
    /// Only use PSMs with at least this score for the inference, as `MS:1002049=100`
    #[arg(long)]
    min_score: Option<String>,
    /// Only use PSMs with at most this score for the inference, as `MS:1002052=1e-10`
    #[arg(long)]
    max_score: Option<String>,
    /// Cancel all loads right after starting them
    #[arg(long)]
    cancel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Method {
    OccamsRazor,
    ReportAll,
}

impl From<Method> for InferenceMethod {
    fn from(value: Method) -> Self {
        match value {
            Method::OccamsRazor => Self::OccamsRazor,
            Method::ReportAll => Self::ReportAll,
        }
    }
}

/// One line of a file
#[derive(Debug, Clone)]
struct Line {
    protein: String,
    peptide: String,
    sequence: String,
    psm: PsmRecord,
}

/// A tab separated identification file
#[derive(Debug)]
struct TsvSource {
    path: PathBuf,
    lines: Option<Vec<Line>>,
}

impl TsvSource {
    fn lines(&self) -> Result<Vec<Line>, BoxedError<'static, LoadErrorKind>> {
        match &self.lines {
            Some(lines) => Ok(lines.clone()),
            None => read_lines(&self.path),
        }
    }
}

impl DataSource for TsvSource {
    fn available_peptide_scores(&self) -> Vec<Curie> {
        let mut scores = Vec::new();
        for line in self.lines().unwrap_or_default() {
            for (score, _) in line.psm.scores {
                if !scores.contains(&score) {
                    scores.push(score);
                }
            }
        }
        scores
    }

    fn proteins(&self) -> Result<Vec<ProteinRecord>, BoxedError<'static, LoadErrorKind>> {
        let mut proteins: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for line in self.lines()? {
            let peptides = proteins.entry(line.protein).or_default();
            if !peptides.contains(&line.peptide) {
                peptides.push(line.peptide);
            }
        }
        Ok(proteins
            .into_iter()
            .map(|(id, peptides)| ProteinRecord { id, peptides })
            .collect())
    }

    fn peptides(&self) -> Result<Vec<PeptideRecord>, BoxedError<'static, LoadErrorKind>> {
        let mut peptides: BTreeMap<String, PeptideRecord> = BTreeMap::new();
        for line in self.lines()? {
            let peptide = peptides
                .entry(line.peptide.clone())
                .or_insert_with(|| PeptideRecord {
                    id: line.peptide,
                    sequence: line.sequence,
                    psms: Vec::new(),
                });
            if peptide.psms.iter().all(|psm| psm.id != line.psm.id) {
                peptide.psms.push(line.psm);
            }
        }
        Ok(peptides.into_values().collect())
    }
}

fn read_lines(path: &Path) -> Result<Vec<Line>, BoxedError<'static, LoadErrorKind>> {
    let context = || Context::none().source(path.to_string_lossy()).to_owned();
    let content = std::fs::read_to_string(path).map_err(|err| {
        BoxedError::new(
            LoadErrorKind::ConstructionFailure,
            "Could not read file",
            err.to_string(),
            context(),
        )
    })?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|(index, line)| {
            let error = |long: String| {
                BoxedError::new(
                    LoadErrorKind::ConstructionFailure,
                    "Invalid line",
                    long,
                    context().line_index(index as u32),
                )
            };
            let columns: Vec<&str> = line.split('\t').collect();
            let [protein, peptide, sequence, psm, scores] = columns[..] else {
                return Err(error(format!(
                    "Expected 5 tab separated columns but found {}",
                    columns.len()
                )));
            };
            let scores = scores
                .split(';')
                .filter(|score| !score.is_empty())
                .map(|score| {
                    let (accession, value) = score
                        .split_once('=')
                        .ok_or_else(|| error(format!("Score '{score}' is not `curie=value`")))?;
                    let accession: Curie = accession
                        .parse()
                        .map_err(|err| error(format!("Invalid score accession: {err:?}")))?;
                    let value: f64 = value
                        .parse()
                        .map_err(|err| error(format!("Invalid score value: {err}")))?;
                    Ok::<_, BoxedError<'static, LoadErrorKind>>((accession, value))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Line {
                protein: protein.to_string(),
                peptide: peptide.to_string(),
                sequence: sequence.to_string(),
                psm: PsmRecord {
                    id: psm.to_string(),
                    scores,
                },
            })
        })
        .collect()
}

/// Opens [`TsvSource`]s
#[derive(Debug)]
struct TsvFactory;

impl SourceFactory for TsvFactory {
    fn construct(
        &self,
        origin: &Path,
        eager: bool,
        _defer_inference: bool,
    ) -> Result<Box<dyn DataSource>, BoxedError<'static, LoadErrorKind>> {
        let lines = if eager {
            Some(read_lines(origin)?)
        } else {
            // Check that the file is valid before handing it out
            read_lines(origin)?;
            None
        };
        Ok(Box::new(TsvSource {
            path: origin.to_path_buf(),
            lines,
        }))
    }

    fn supports_deferred_inference(&self) -> bool {
        true
    }
}

fn parse_filter(
    text: &str,
    filter: fn(Curie, f64) -> PsmFilter,
) -> Result<PsmFilter, BoxedError<'static, BasicKind>> {
    let error = |long: String| {
        BoxedError::new(
            BasicKind::Error,
            "Invalid score filter",
            long,
            Context::none().lines(0, text).to_owned(),
        )
    };
    let (accession, threshold) = text
        .split_once('=')
        .ok_or_else(|| error("A filter is written as `curie=threshold`".to_string()))?;
    Ok(filter(
        accession
            .parse()
            .map_err(|err| error(format!("Invalid accession: {err:?}")))?,
        threshold
            .parse()
            .map_err(|err| error(format!("Invalid threshold: {err}")))?,
    ))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let args = Cli::parse();
    let filters = args
        .min_score
        .iter()
        .map(|text| {
            parse_filter(text, |accession, threshold| PsmFilter::ScoreAtLeast {
                accession,
                threshold,
            })
        })
        .chain(args.max_score.iter().map(|text| {
            parse_filter(text, |accession, threshold| PsmFilter::ScoreAtMost {
                accession,
                threshold,
            })
        }))
        .collect::<Result<Vec<_>, _>>();
    let filters = match filters {
        Ok(filters) => filters,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let registry: SharedRegistry = InMemoryRegistry::new().shared();
    let (progress, messages) = crossbeam_channel::unbounded::<String>();
    let reporter = thread::spawn(move || {
        for message in messages {
            info!("{message}");
        }
    });
    let loader = Arc::new(
        Loader::new(
            registry.clone(),
            FactoryTable::new().with(FormatKind::Other, TsvFactory),
        )
        .with_settings(LoadSettings {
            inference: InferenceSettings {
                method: args.method.into(),
                filters,
            },
        })
        .with_progress(progress),
    );

    let tasks: Vec<_> = args
        .in_path
        .iter()
        .map(|path| {
            loader.spawn(
                LoadRequest::new(path)
                    .eager(args.in_memory)
                    .defer_inference(args.infer)
                    .format(FormatKind::Other),
            )
        })
        .collect();
    if args.cancel {
        tasks.iter().for_each(mzload::LoadTask::cancel);
    }

    let mut failed = false;
    for task in tasks {
        let origin = task.origin().to_path_buf();
        match task.join() {
            LoadOutcome::Loaded(handle) => {
                info!(origin = %origin.display(), "Loaded");
                if let Some(groups) = handle.inferred_groups() {
                    match serde_json::to_string_pretty(groups) {
                        Ok(json) => println!("{json}"),
                        Err(err) => warn!(error = %err, "Could not show the protein groups"),
                    }
                }
            }
            LoadOutcome::AlreadyOpen | LoadOutcome::InProgress => {
                info!(origin = %origin.display(), "Given multiple times");
            }
            LoadOutcome::Cancelled => warn!(origin = %origin.display(), "Cancelled"),
            LoadOutcome::Failed(err) => {
                eprintln!("{err}");
                failed = true;
            }
        }
    }
    // Closes the progress channel, the workers are done so this was the last sender
    drop(loader);
    if reporter.join().is_err() {
        warn!("Progress reporting stopped early");
    }
    info!(open = lock_registry(&registry).handles().len(), "Done");
    if failed {
        std::process::exit(1);
    }
}
