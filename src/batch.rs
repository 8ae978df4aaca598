//! Parallel processing of a directory of VCF files and the `batch` subcommand.
//!
//! Each input file becomes one task that is filtered, annotated and projected
//! to a normalized table.  Tasks run on a bounded thread pool and fail
//! independently of each other.  Finally, the successful tables are
//! aggregated into the summary report.

use std::{
    io::Write,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
};

use noodles_core::Region;
use rayon::prelude::*;

use crate::{
    annotate,
    common::{self, GenomeBuild},
    conf::{self, Config, Thresholds},
    filter::{self, FilterStats},
    project::{self, Projector, NORMALIZED_SUFFIX},
    report,
};

/// File name suffixes of batch input files.
pub const INPUT_SUFFIXES: &[&str] = &[".vcf.gz", ".vcf.bgz"];

/// Name of the per-batch outcome summary written to the output directory.
pub const OUTCOMES_FILE: &str = "batch_outcomes.json";

/// Batch-level errors; these abort the whole batch.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no input files found in {0:?}")]
    NoInputFiles(PathBuf),
    #[error(transparent)]
    Annotator(#[from] annotate::Error),
    #[error("could not list input directory {0:?}: {1}")]
    ReadDir(PathBuf, #[source] std::io::Error),
    #[error("could not prepare directory {0:?}: {1}")]
    PrepareDir(PathBuf, #[source] std::io::Error),
    #[error("could not build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("could not write {0:?}: {1}")]
    WriteOutcomes(PathBuf, String),
    #[error("none of the {0} tasks succeeded")]
    NoSuccessfulTask(usize),
    #[error(transparent)]
    Report(#[from] report::Error),
}

/// Errors of a single task; these are recorded and do not abort the batch.
#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("could not claim output name: {0}")]
    Claim(#[source] std::io::Error),
    #[error(transparent)]
    Filter(#[from] filter::Error),
    #[error("no variants passed the filter")]
    NoPassingVariants(FilterStats),
    #[error(transparent)]
    Annotate(#[from] annotate::Error),
    #[error(transparent)]
    Project(#[from] project::Error),
    #[error("task panicked: {0}")]
    Panic(String),
}

/// Description of one unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Path to the bgzf-compressed and indexed input file.
    pub path_in: PathBuf,
    /// Optional region to restrict the filter to.
    pub region: Option<Region>,
    /// Minimal allele fraction for this task.
    pub min_allele_fraction: f64,
    /// Genome build passed to the annotator.
    pub genome_build: GenomeBuild,
}

impl Task {
    /// File name of the input without directory and input suffix.
    pub fn input_stem(&self) -> String {
        let name = self
            .path_in
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        INPUT_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .map(str::to_string)
            .unwrap_or(name)
    }

    /// Short fingerprint of the task parameters.
    ///
    /// The same input file with the same parameters always gets the same
    /// fingerprint; the generation marker added by `common::create_unique`
    /// keeps repeated runs apart.
    pub fn fingerprint(&self) -> String {
        let key = format!(
            "{}\t{:?}\t{}\t{}",
            self.path_in
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            self.region,
            self.min_allele_fraction,
            self.genome_build
        );
        let uuid = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes());
        uuid.simple().to_string()[..8].to_string()
    }
}

/// Final state of one task.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Success {
        /// Path to the normalized table.
        path_normalized: PathBuf,
        /// Number of rows in the normalized table.
        rows: usize,
    },
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Outcome of one task as written to the outcome summary.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskOutcome {
    pub path_in: PathBuf,
    #[serde(flatten)]
    pub status: Status,
    /// Filter counts, if the filter stage completed.
    pub filter_stats: Option<FilterStats>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Success { .. })
    }
}

/// The outcome summary of a batch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Summary {
    /// Version of the program.
    pub version: String,
    /// Outcome per task, in input order.
    pub outcomes: Vec<TaskOutcome>,
}

impl Summary {
    /// Paths of all normalized tables, in input order.
    pub fn successful_tables(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.status {
                Status::Success {
                    path_normalized, ..
                } => Some(path_normalized.clone()),
                Status::Failed { .. } => None,
            })
            .collect()
    }
}

/// Return the sorted paths of all input files in `dir`.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let read_err = |e| Error::ReadDir(dir.to_path_buf(), e);

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        if path.is_file() && INPUT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Stringify the payload of a caught panic.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Runs tasks through filter, annotator and projector.
#[derive(Debug)]
pub struct Orchestrator {
    thresholds: Thresholds,
    invoker: annotate::Invoker,
    projector: Projector,
    /// Directory for normalized tables and annotator intermediates.
    dir_out: PathBuf,
    /// Directory for filtered files, removed by the caller after the batch.
    dir_scratch: PathBuf,
}

impl Orchestrator {
    /// Construct, failing if the annotator is not usable.
    pub fn new(config: &Config, dir_out: &Path, dir_scratch: &Path) -> Result<Self, Error> {
        Ok(Self {
            thresholds: config.thresholds.clone(),
            invoker: annotate::Invoker::new(&config.annotator)?,
            projector: Projector::new(&config.columns),
            dir_out: dir_out.to_path_buf(),
            dir_scratch: dir_scratch.to_path_buf(),
        })
    }

    /// Run all `tasks` on a pool of `num_threads` workers.
    ///
    /// The returned outcomes are in the order of `tasks`.  A failing or
    /// panicking task does not affect the others.
    pub fn run_all(&self, tasks: &[Task], num_threads: usize) -> Result<Vec<TaskOutcome>, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("annoflow-worker-{}", i))
            .build()?;
        tracing::info!(
            "running {} tasks on {} worker threads",
            tasks.len(),
            num_threads
        );

        let outcomes = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| self.run_isolated(task))
                .collect::<Vec<_>>()
        });

        for outcome in &outcomes {
            match &outcome.status {
                Status::Success {
                    path_normalized,
                    rows,
                } => tracing::info!(
                    "{:?}: wrote {} rows to {:?}",
                    &outcome.path_in,
                    rows,
                    path_normalized
                ),
                Status::Failed { reason } => {
                    tracing::warn!("{:?}: task failed: {}", &outcome.path_in, reason)
                }
            }
        }

        Ok(outcomes)
    }

    /// Run `task`, converting errors and panics into a failed outcome.
    pub fn run_isolated(&self, task: &Task) -> TaskOutcome {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.run_task(task)))
            .unwrap_or_else(|payload| Err(TaskError::Panic(panic_message(payload))));

        match result {
            Ok((path_normalized, rows, stats)) => TaskOutcome {
                path_in: task.path_in.clone(),
                status: Status::Success {
                    path_normalized,
                    rows,
                },
                filter_stats: Some(stats),
            },
            Err(e) => {
                let filter_stats = match &e {
                    TaskError::NoPassingVariants(stats) => Some(stats.clone()),
                    _ => None,
                };
                TaskOutcome {
                    path_in: task.path_in.clone(),
                    status: Status::Failed {
                        reason: e.to_string(),
                    },
                    filter_stats,
                }
            }
        }
    }

    /// Run the pipeline for one task.
    ///
    /// Returns path and row count of the normalized table together with the
    /// filter counts.  On failure, all files of the task in the output
    /// directory are removed.
    pub fn run_task(&self, task: &Task) -> Result<(PathBuf, usize, FilterStats), TaskError> {
        let base = format!("{}.{}", task.input_stem(), task.fingerprint());
        let (stem, _) = common::create_unique(&self.dir_out, &base, NORMALIZED_SUFFIX)
            .map_err(TaskError::Claim)?;
        let path_normalized = self.dir_out.join(format!("{}{}", stem, NORMALIZED_SUFFIX));
        tracing::debug!("task {} for {:?}", &stem, &task.path_in);

        match self.run_stages(task, &stem, &path_normalized) {
            Ok((rows, stats)) => {
                project::remove_intermediates(&self.dir_out, &stem, Some(path_normalized.as_path()))?;
                Ok((path_normalized, rows, stats))
            }
            Err(e) => {
                if let Err(cleanup_err) = project::remove_intermediates(&self.dir_out, &stem, None)
                {
                    tracing::warn!("could not clean up after {}: {}", &stem, cleanup_err);
                }
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        task: &Task,
        stem: &str,
        path_normalized: &Path,
    ) -> Result<(usize, FilterStats), TaskError> {
        let thresholds = Thresholds {
            min_allele_fraction: task.min_allele_fraction,
            ..self.thresholds.clone()
        };
        let (path_filtered, stats) = match filter::filter_file(
            &task.path_in,
            &self.dir_scratch,
            stem,
            task.region.as_ref(),
            &thresholds,
        )? {
            filter::Outcome::Written { path, stats, .. } => (path, stats),
            filter::Outcome::NoOutput { stats } => return Err(TaskError::NoPassingVariants(stats)),
        };

        let path_table =
            self.invoker
                .run(&path_filtered, &self.dir_out.join(stem), task.genome_build)?;
        let rows = self.projector.project(&path_table, path_normalized)?;

        Ok((rows, stats))
    }
}

/// Parameters of one batch beyond the configuration.
#[derive(Debug, Clone, Default)]
pub struct Params {
    /// Directory with input files.
    pub dir_in: PathBuf,
    /// Directory for normalized tables and the report.
    pub dir_out: PathBuf,
    /// Parent directory for the scratch directory, defaults to `dir_out`.
    pub dir_scratch: Option<PathBuf>,
    /// Region applied to all tasks.
    pub region: Option<Region>,
    /// Number of worker threads, defaults to the available parallelism.
    pub num_threads: Option<usize>,
}

/// Run the whole batch: discover inputs, process them, write the report.
pub fn run_batch(config: &Config, params: &Params) -> Result<Summary, Error> {
    std::fs::create_dir_all(&params.dir_out)
        .map_err(|e| Error::PrepareDir(params.dir_out.clone(), e))?;
    let scratch_parent = params.dir_scratch.as_ref().unwrap_or(&params.dir_out);
    let dir_scratch = tempfile::Builder::new()
        .prefix("annoflow-scratch.")
        .tempdir_in(scratch_parent)
        .map_err(|e| Error::PrepareDir(scratch_parent.clone(), e))?;

    let orchestrator = Orchestrator::new(config, &params.dir_out, dir_scratch.path())?;
    let inputs = discover_inputs(&params.dir_in)?;
    if inputs.is_empty() {
        return Err(Error::NoInputFiles(params.dir_in.clone()));
    }

    let genome_build = config.genome_build();
    let tasks = inputs
        .into_iter()
        .map(|path_in| Task {
            path_in,
            region: params.region.clone(),
            min_allele_fraction: config.thresholds.min_allele_fraction,
            genome_build,
        })
        .collect::<Vec<_>>();
    let num_threads = params.num_threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let summary = Summary {
        version: common::worker_version().to_string(),
        outcomes: orchestrator.run_all(&tasks, num_threads)?,
    };
    common::trace_rss_now();

    let path_outcomes = params.dir_out.join(OUTCOMES_FILE);
    write_summary(&summary, &path_outcomes)
        .map_err(|e| Error::WriteOutcomes(path_outcomes.clone(), e.to_string()))?;
    if let Err(e) = dir_scratch.close() {
        tracing::warn!("could not remove scratch directory: {}", e);
    }

    let tables = summary.successful_tables();
    tracing::info!(
        "{} of {} tasks succeeded",
        tables.len(),
        summary.outcomes.len()
    );
    if tables.is_empty() {
        return Err(Error::NoSuccessfulTask(summary.outcomes.len()));
    }
    report::generate(&config.columns, &tables, &params.dir_out)?;

    Ok(summary)
}

fn write_summary(summary: &Summary, path: &Path) -> Result<(), anyhow::Error> {
    let mut writer = common::io::open_write_maybe_gz(path)?;
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;
    Ok(())
}

/// Command line arguments for `batch` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "filter, annotate and summarize a directory of VCF files", long_about = None)]
pub struct Args {
    /// Directory with `*.vcf.gz` input files.
    #[clap(long)]
    pub path_input_dir: PathBuf,
    /// Directory to write normalized tables and the report to.
    #[clap(long)]
    pub path_output_dir: PathBuf,
    /// Parent directory for scratch files, defaults to the output directory.
    #[clap(long)]
    pub path_scratch_dir: Option<PathBuf>,
    /// Optional path to JSON configuration file.
    #[clap(long)]
    pub path_config: Option<PathBuf>,
    /// Path to annotator installation, overrides the configuration.
    #[clap(long)]
    pub path_annovar: Option<PathBuf>,
    /// Region to restrict to, e.g., "chr1:100-200".
    #[clap(long)]
    pub region: Option<Region>,
    /// Minimal read depth, overrides the configuration.
    #[clap(long)]
    pub min_depth: Option<i32>,
    /// Minimal alternate allele fraction, overrides the configuration.
    #[clap(long)]
    pub min_allele_fraction: Option<f64>,
    /// Genome build, overrides the configuration.
    #[clap(long)]
    pub genome_build: Option<String>,
    /// Number of worker threads.
    #[clap(long)]
    pub num_threads: Option<usize>,
}

/// Main entry point for `batch` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let mut config = match &args.path_config {
        Some(path) => conf::Config::from_path(path)?,
        None => conf::Config::default(),
    };
    if let Some(path) = &args.path_annovar {
        config.annotator.path = Some(path.clone());
    }
    if let Some(min_depth) = args.min_depth {
        config.thresholds.min_depth = min_depth;
    }
    if let Some(min_allele_fraction) = args.min_allele_fraction {
        config.thresholds.min_allele_fraction = min_allele_fraction;
    }
    if let Some(genome_build) = &args.genome_build {
        config.genome_build = genome_build.clone();
    }
    tracing::info!("config = {:#?}", &config);

    let params = Params {
        dir_in: args.path_input_dir.clone(),
        dir_out: args.path_output_dir.clone(),
        dir_scratch: args.path_scratch_dir.clone(),
        region: args.region.clone(),
        num_threads: args.num_threads,
    };
    let summary = run_batch(&config, &params)?;
    let failed = summary
        .outcomes
        .iter()
        .filter(|outcome| !outcome.is_success())
        .count();
    if failed > 0 {
        tracing::warn!(
            "{} tasks failed, see {:?}",
            failed,
            params.dir_out.join(OUTCOMES_FILE)
        );
    }

    tracing::info!(
        "All of `batch` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
