//! Implementation of the file filter stage and the `filter` subcommand.

use std::path::{Path, PathBuf};

use enum_map::EnumMap;
use noodles_bgzf as bgzf;
use noodles_core::Region;
use noodles_vcf as vcf;
use thousands::Separable;

use crate::{
    common::{self, noodles::find_index},
    conf::Thresholds,
};

pub mod threshold;

pub use threshold::{Decision, FailReason, VariantRecord};

/// File name suffix of filtered files.
pub const FILTERED_SUFFIX: &str = ".vcf.gz";

/// Error type for the file filter stage.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("input file {0:?} is not compressed")]
    InputNotCompressed(PathBuf),
    #[error("input file {0:?} is not indexed (no .tbi or .csi file found)")]
    InputNotIndexed(PathBuf),
    #[error("could not open input file {0:?}: {1}")]
    OpenInput(PathBuf, #[source] std::io::Error),
    #[error("could not create output file in {0:?}: {1}")]
    CreateOutput(PathBuf, #[source] std::io::Error),
    #[error("problem querying region {0}: {1}")]
    Query(String, #[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not index output file {0:?}: {1}")]
    Index(PathBuf, String),
}

/// Per-file record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FilterStats {
    /// Number of records read.
    pub records_read: usize,
    /// Number of records written.
    pub records_passed: usize,
    /// Number of failed records by reason.
    pub failed: EnumMap<FailReason, usize>,
}

impl FilterStats {
    fn register(&mut self, decision: Decision) {
        self.records_read += 1;
        match decision {
            Decision::Pass => self.records_passed += 1,
            Decision::Fail(reason) => self.failed[reason] += 1,
        }
    }
}

/// Outcome of filtering one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// At least one record passed; the output was written to `path`.
    Written {
        path: PathBuf,
        stem: String,
        stats: FilterStats,
    },
    /// No record passed; no output was left behind.
    NoOutput { stats: FilterStats },
}

/// Check that `path` is a compressed file with a companion index.
pub fn check_input<P>(path: P) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let compressed =
        common::io::is_gzip(path).map_err(|e| Error::OpenInput(path.to_path_buf(), e))?;
    if !compressed {
        return Err(Error::InputNotCompressed(path.to_path_buf()));
    }
    if find_index(path).is_none() {
        return Err(Error::InputNotIndexed(path.to_path_buf()));
    }
    Ok(())
}

/// Filter records from `path_in` into a new file `{stem}.vcf.gz` in `dir_out`.
///
/// The output name is made unique if a file of that name already exists.  If
/// no record passes then the output file is removed again.
pub fn filter_file(
    path_in: &Path,
    dir_out: &Path,
    stem: &str,
    region: Option<&Region>,
    thresholds: &Thresholds,
) -> Result<Outcome, Error> {
    check_input(path_in)?;

    let mut reader = vcf::indexed_reader::Builder::default()
        .build_from_path(path_in)
        .map_err(|e| Error::OpenInput(path_in.to_path_buf(), e))?;
    let header = reader
        .read_header()
        .map_err(|e| Error::OpenInput(path_in.to_path_buf(), e))?;

    let (stem, file) = common::create_unique(dir_out, stem, FILTERED_SUFFIX)
        .map_err(|e| Error::CreateOutput(dir_out.to_path_buf(), e))?;
    let path_out = dir_out.join(format!("{}{}", stem, FILTERED_SUFFIX));
    tracing::debug!("filtering {:?} to {:?}", path_in, &path_out);

    let records: Box<dyn Iterator<Item = std::io::Result<vcf::Record>> + '_> = match region {
        Some(region) => match reader.query(&header, region) {
            Ok(query) => Box::new(query),
            // The index only lists reference sequences that have records.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                tracing::debug!("no indexed records for {} in {:?}: {}", region, path_in, e);
                Box::new(std::iter::empty())
            }
            Err(e) => {
                remove_quietly(&path_out);
                return Err(Error::Query(region.to_string(), e));
            }
        },
        None => Box::new(reader.records(&header)),
    };
    let stats = match write_filtered(records, &header, file, thresholds) {
        Ok(stats) => stats,
        Err(e) => {
            remove_quietly(&path_out);
            return Err(e);
        }
    };
    log_stats(path_in, &stats);

    if stats.records_passed == 0 {
        tracing::info!("no record of {:?} passed the filter", path_in);
        std::fs::remove_file(&path_out)?;
        return Ok(Outcome::NoOutput { stats });
    }

    let mut path_tbi = path_out.as_os_str().to_owned();
    path_tbi.push(".tbi");
    common::noodles::build_tbi(&path_out, &path_tbi)
        .map_err(|e| Error::Index(path_out.clone(), e.to_string()))?;

    Ok(Outcome::Written {
        path: path_out,
        stem,
        stats,
    })
}

/// Run the threshold filter on `records`, write passing ones to `file`.
///
/// Records that cannot be parsed count as failed.
fn write_filtered<I>(
    records: I,
    header: &vcf::Header,
    file: std::fs::File,
    thresholds: &Thresholds,
) -> Result<FilterStats, Error>
where
    I: Iterator<Item = std::io::Result<vcf::Record>>,
{
    let mut writer = vcf::Writer::new(bgzf::Writer::new(file));
    writer.write_header(header)?;

    let mut stats = FilterStats::default();
    let mut prev = std::time::Instant::now();

    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("skipping malformed record: {}", e);
                stats.register(Decision::Fail(FailReason::MalformedRecord));
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let variant = VariantRecord::from_vcf(&record);
        let decision = threshold::evaluate(&variant, thresholds);
        tracing::trace!("{:?} -> {:?}", &variant, &decision);
        if decision.is_pass() {
            writer.write_record(header, &record)?;
        }
        stats.register(decision);

        if prev.elapsed().as_secs() >= 60 {
            tracing::info!("at {}:{}", &variant.chrom, variant.pos);
            prev = std::time::Instant::now();
        }
    }
    writer.get_mut().try_finish()?;

    Ok(stats)
}

fn log_stats(path_in: &Path, stats: &FilterStats) {
    tracing::info!(
        "{:?}: {} of {} records passed",
        path_in,
        stats.records_passed.separate_with_commas(),
        stats.records_read.separate_with_commas()
    );
    for (reason, count) in stats.failed.iter().filter(|(_, count)| **count > 0) {
        tracing::debug!("  {}: {}", reason, count.separate_with_commas());
    }
}

/// Remove `path`, logging instead of failing.
pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("could not remove {:?}: {}", path, e);
    }
}

/// Command line arguments for `filter` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "filter one VCF file by depth, allele fraction and quality", long_about = None)]
pub struct Args {
    /// Path to input file; must be bgzf-compressed and indexed.
    #[clap(long)]
    pub path_in: PathBuf,
    /// Path to output file; a suffix is added if it exists.
    #[clap(long)]
    pub path_out: PathBuf,
    /// Region to restrict to, e.g., "chr1:100-200".
    #[clap(long)]
    pub region: Option<Region>,
    /// Minimal read depth.
    #[clap(long, default_value_t = Thresholds::default().min_depth)]
    pub min_depth: i32,
    /// Minimal alternate allele fraction.
    #[clap(long, default_value_t = Thresholds::default().min_allele_fraction)]
    pub min_allele_fraction: f64,
    /// Minimal variant quality.
    #[clap(long, default_value_t = Thresholds::default().min_quality)]
    pub min_quality: f32,
}

/// Split `path` into directory and file name without the `.vcf.gz` suffix.
fn split_output_path(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(FILTERED_SUFFIX)
        .map(str::to_string)
        .unwrap_or(name);
    (dir, stem)
}

/// Main entry point for `filter` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let thresholds = Thresholds {
        min_depth: args.min_depth,
        min_allele_fraction: args.min_allele_fraction,
        min_quality: args.min_quality,
    };
    let (dir_out, stem) = split_output_path(&args.path_out);

    match filter_file(
        &args.path_in,
        &dir_out,
        &stem,
        args.region.as_ref(),
        &thresholds,
    )
    .map_err(|e| anyhow::anyhow!("filtering {:?} failed: {}", &args.path_in, e))?
    {
        Outcome::Written { path, .. } => tracing::info!("wrote {:?}", path),
        Outcome::NoOutput { .. } => tracing::warn!("no variants passed, no output written"),
    }

    tracing::info!(
        "All of `filter` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
