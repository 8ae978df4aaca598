//! Aggregation of normalized tables into a summary report and the `report`
//! subcommand.

use std::{
    collections::{HashMap, HashSet},
    io::Write,
    path::{Path, PathBuf},
};

use itertools::Itertools;

use crate::{
    common,
    conf::{self, ColumnSpec, Role},
    project::NORMALIZED_SUFFIX,
};

/// Score above which a variant counts as high-impact.
pub const HIGH_PATHOGENICITY_SCORE: f64 = 0.5;

/// Number of genes listed in the "Top Annotated Gene" metrics.
const TOP_GENES: usize = 5;

/// Transition pairs of (reference, alternate); all other single-base
/// substitutions are transversions.
const TRANSITIONS: &[(&str, &str)] = &[("A", "G"), ("G", "A"), ("C", "T"), ("T", "C")];

/// Bases considered for transition/transversion classification.
const BASES: &[&str] = &["A", "C", "G", "T"];

/// Error type for report generation.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no normalized tables found in {0:?}")]
    NoTables(PathBuf),
    #[error("could not read {0:?}: {1}")]
    Read(PathBuf, String),
    #[error("schema mismatch in {path:?}: expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("could not write {0:?}: {1}")]
    Write(PathBuf, String),
}

/// The columns of one normalized table row that the metrics look at.
///
/// Missing values (empty or `.`) are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub reference: Option<String>,
    pub alternate: Option<String>,
    pub func: Option<String>,
    pub gene: Option<String>,
    pub exonic_func: Option<String>,
    pub clinical_significance: Option<String>,
    pub pathogenicity_score: Option<String>,
}

/// Value of one metric.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Count(usize),
    Ratio(f64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Count(count) => write!(f, "{}", count),
            Value::Ratio(ratio) => write!(f, "{:?}", ratio),
            Value::Text(text) => write!(f, "{}", text),
        }
    }
}

/// One named metric.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Metric {
    pub name: String,
    pub value: Value,
}

/// The summary report, an ordered list of metrics.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Report {
    pub metrics: Vec<Metric>,
}

fn missing_to_none(value: &str) -> Option<String> {
    match value.trim() {
        "" | "." => None,
        value => Some(value.to_string()),
    }
}

/// Reads normalized tables, checking their header against the configuration.
#[derive(Debug, Clone)]
pub struct TableReader {
    header: Vec<String>,
    positions: HashMap<Role, usize>,
}

impl TableReader {
    pub fn new(columns: &[ColumnSpec]) -> Self {
        Self {
            header: columns.iter().map(|c| c.name.clone()).collect(),
            positions: columns
                .iter()
                .enumerate()
                .map(|(i, c)| (c.role, i))
                .collect(),
        }
    }

    fn get(&self, record: &csv::StringRecord, role: Role) -> Option<String> {
        self.positions
            .get(&role)
            .and_then(|i| record.get(*i))
            .and_then(missing_to_none)
    }

    /// Read all rows of the table at `path`.
    pub fn read(&self, path: &Path) -> Result<Vec<Row>, Error> {
        let read_err = |e: &dyn std::fmt::Display| Error::Read(path.to_path_buf(), e.to_string());

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(common::open_read_maybe_gz(path).map_err(|e| read_err(&e))?);

        let found = reader
            .headers()
            .map_err(|e| read_err(&e))?
            .iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if found != self.header {
            return Err(Error::SchemaMismatch {
                path: path.to_path_buf(),
                expected: self.header.clone(),
                found,
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| read_err(&e))?;
            rows.push(Row {
                reference: self.get(&record, Role::Reference),
                alternate: self.get(&record, Role::Alternate),
                func: self.get(&record, Role::Func),
                gene: self.get(&record, Role::Gene),
                exonic_func: self.get(&record, Role::ExonicFunc),
                clinical_significance: self.get(&record, Role::ClinicalSignificance),
                pathogenicity_score: self.get(&record, Role::PathogenicityScore),
            });
        }
        Ok(rows)
    }

    /// Read and concatenate all rows of the tables at `paths`.
    pub fn read_all<P>(&self, paths: &[P]) -> Result<Vec<Row>, Error>
    where
        P: AsRef<Path>,
    {
        let mut rows = Vec::new();
        for path in paths {
            rows.extend(self.read(path.as_ref())?);
        }
        Ok(rows)
    }
}

/// Return the sorted paths of all normalized tables in `dir`.
pub fn find_tables(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let read_err = |e: std::io::Error| Error::Read(dir.to_path_buf(), e.to_string());

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        let is_table = path
            .file_name()
            .map(|name| name.to_string_lossy().ends_with(NORMALIZED_SUFFIX))
            .unwrap_or(false);
        if is_table && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Whether `(reference, alternate)` is a transition, a transversion or neither.
fn classify_substitution(row: &Row) -> (bool, bool) {
    match (row.reference.as_deref(), row.alternate.as_deref()) {
        (Some(reference), Some(alternate))
            if reference != alternate
                && BASES.contains(&reference)
                && BASES.contains(&alternate) =>
        {
            let transition = TRANSITIONS.contains(&(reference, alternate));
            (transition, !transition)
        }
        _ => (false, false),
    }
}

/// Count rows by `key`, ordered by descending count and then key.
fn value_counts<'a, F>(rows: &'a [Row], key: F) -> Vec<(&'a str, usize)>
where
    F: Fn(&'a Row) -> Option<&'a str>,
{
    rows.iter()
        .filter_map(key)
        .counts()
        .into_iter()
        .sorted_by(|(lhs_key, lhs), (rhs_key, rhs)| rhs.cmp(lhs).then(lhs_key.cmp(rhs_key)))
        .collect()
}

impl Report {
    fn push(&mut self, name: &str, value: Value) {
        self.metrics.push(Metric {
            name: name.to_string(),
            value,
        });
    }

    fn push_count<F>(&mut self, name: &str, rows: &[Row], pred: F)
    where
        F: Fn(&Row) -> bool,
    {
        self.push(name, Value::Count(rows.iter().filter(|row| pred(row)).count()));
    }

    /// Compute all metrics over `rows`.
    pub fn compute(rows: &[Row]) -> Self {
        let mut report = Report::default();

        fn func(row: &Row) -> &str {
            row.func.as_deref().unwrap_or_default()
        }
        fn clnsig(row: &Row) -> &str {
            row.clinical_significance.as_deref().unwrap_or_default()
        }
        fn exonic_func(row: &Row) -> &str {
            row.exonic_func.as_deref().unwrap_or_default()
        }

        report.push("Total Variants", Value::Count(rows.len()));

        report.push_count("Exonic Variants", rows, |row| func(row) == "exonic");
        report.push_count("Intronic Variants", rows, |row| func(row) == "intronic");
        report.push_count("UTR Variants", rows, |row| func(row).contains("UTR"));
        report.push_count("Splicing Variants", rows, |row| func(row) == "splicing");

        if rows.iter().any(|row| row.clinical_significance.is_some()) {
            report.push_count("Benign Variants", rows, |row| {
                clnsig(row).contains("Benign") && !clnsig(row).contains("Likely_benign")
            });
            report.push_count("Likely Benign Variants", rows, |row| {
                clnsig(row).contains("Likely_benign")
            });
            report.push_count("Pathogenic Variants", rows, |row| {
                clnsig(row).contains("Pathogenic") && !clnsig(row).contains("Likely_pathogenic")
            });
            report.push_count("Likely Pathogenic Variants", rows, |row| {
                clnsig(row).contains("Likely_pathogenic")
            });
            report.push_count("VUS Variants", rows, |row| {
                clnsig(row).to_lowercase().contains("uncertain")
            });
            report.push_count("Conflicting Variants", rows, |row| {
                clnsig(row).contains("Conflicting")
            });
        }

        let (transitions, transversions) =
            rows.iter()
                .map(classify_substitution)
                .fold((0, 0), |(ts, tv), (is_ts, is_tv)| {
                    (ts + is_ts as usize, tv + is_tv as usize)
                });
        report.push("Transitions", Value::Count(transitions));
        report.push("Transversions", Value::Count(transversions));
        let ratio = if transversions > 0 {
            transitions as f64 / transversions as f64
        } else {
            f64::NAN
        };
        report.push("Ts/Tv ratio", Value::Ratio(ratio));

        let genes = rows
            .iter()
            .filter_map(|row| row.gene.as_deref())
            .collect::<HashSet<_>>();
        report.push("Unique Genes", Value::Count(genes.len()));

        for (category, count) in value_counts(rows, |row| row.exonic_func.as_deref()) {
            report.push(&format!("Exonic {}", category), Value::Count(count));
        }
        report.push_count("Nonsynonymous SNVs", rows, |row| {
            exonic_func(row) == "nonsynonymous SNV"
        });
        report.push_count("Synonymous SNVs", rows, |row| {
            exonic_func(row) == "synonymous SNV"
        });
        report.push_count("Frameshift Insertions", rows, |row| {
            exonic_func(row).contains("frameshift insertion")
        });
        report.push_count("Frameshift Deletions", rows, |row| {
            exonic_func(row).contains("frameshift deletion")
        });
        report.push_count("Stopgain Variants", rows, |row| {
            exonic_func(row).contains("stopgain")
        });
        report.push_count("Stoploss Variants", rows, |row| {
            exonic_func(row).contains("stoploss")
        });

        let scores = rows
            .iter()
            .filter_map(|row| row.pathogenicity_score.as_deref())
            .filter_map(|score| score.parse::<f64>().ok())
            .filter(|score| !score.is_nan())
            .collect::<Vec<_>>();
        report.push("Variants with REVEL Scores", Value::Count(scores.len()));
        report.push(
            "Variants with High REVEL (>0.5)",
            Value::Count(
                scores
                    .iter()
                    .filter(|score| **score > HIGH_PATHOGENICITY_SCORE)
                    .count(),
            ),
        );

        for (i, (gene, count)) in value_counts(rows, |row| row.gene.as_deref())
            .into_iter()
            .take(TOP_GENES)
            .enumerate()
        {
            report.push(
                &format!("Top Annotated Gene {}", i + 1),
                Value::Text(format!("{} ({})", gene, count)),
            );
        }

        report
    }

    /// Look up metric value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| &metric.value)
    }

    /// Render as CSV with `Metric` and `Value` columns.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["Metric", "Value"])?;
        for metric in &self.metrics {
            writer.write_record([metric.name.as_str(), metric.value.to_string().as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Render as standalone HTML table.
    pub fn write_html<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        fn escape(s: &str) -> String {
            s.replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('"', "&quot;")
        }

        writeln!(writer, "<table border=\"1\" class=\"dataframe\">")?;
        writeln!(writer, "  <thead>")?;
        writeln!(writer, "    <tr><th>Metric</th><th>Value</th></tr>")?;
        writeln!(writer, "  </thead>")?;
        writeln!(writer, "  <tbody>")?;
        for metric in &self.metrics {
            writeln!(
                writer,
                "    <tr><td>{}</td><td>{}</td></tr>",
                escape(&metric.name),
                escape(&metric.value.to_string())
            )?;
        }
        writeln!(writer, "  </tbody>")?;
        writeln!(writer, "</table>")?;
        writer.flush()
    }

    /// Write `summary_report.{csv,html,json}` into `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<Vec<PathBuf>, Error> {
        let write_err =
            |path: &Path, e: &dyn std::fmt::Display| Error::Write(path.to_path_buf(), e.to_string());

        let path_csv = dir.join("summary_report.csv");
        let writer = common::io::open_write_maybe_gz(&path_csv).map_err(|e| write_err(&path_csv, &e))?;
        self.write_csv(writer).map_err(|e| write_err(&path_csv, &e))?;

        let path_html = dir.join("summary_report.html");
        let writer =
            common::io::open_write_maybe_gz(&path_html).map_err(|e| write_err(&path_html, &e))?;
        self.write_html(writer)
            .map_err(|e| write_err(&path_html, &e))?;

        let path_json = dir.join("summary_report.json");
        let mut writer =
            common::io::open_write_maybe_gz(&path_json).map_err(|e| write_err(&path_json, &e))?;
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| write_err(&path_json, &e))?;
        writer.flush().map_err(|e| write_err(&path_json, &e))?;

        Ok(vec![path_csv, path_html, path_json])
    }
}

/// Aggregate the normalized tables at `paths` and write the report to `dir_out`.
pub fn generate<P>(columns: &[ColumnSpec], paths: &[P], dir_out: &Path) -> Result<Report, Error>
where
    P: AsRef<Path>,
{
    tracing::info!("aggregating {} normalized tables...", paths.len());
    let rows = TableReader::new(columns).read_all(paths)?;
    let report = Report::compute(&rows);
    for path in report.write_to_dir(dir_out)? {
        tracing::info!("wrote {:?}", path);
    }
    Ok(report)
}

/// Command line arguments for `report` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "summarize normalized tables in a directory", long_about = None)]
pub struct Args {
    /// Directory with `*.normalized.tsv` files; the report is written here.
    #[clap(long)]
    pub path_dir: PathBuf,
    /// Optional path to JSON configuration file.
    #[clap(long)]
    pub path_config: Option<PathBuf>,
}

/// Main entry point for `report` sub command.
pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let config = match &args.path_config {
        Some(path) => conf::Config::from_path(path)?,
        None => conf::Config::default(),
    };

    let paths = find_tables(&args.path_dir)?;
    if paths.is_empty() {
        return Err(Error::NoTables(args.path_dir.clone()).into());
    }
    let report = generate(&config.columns, &paths, &args.path_dir)?;
    tracing::info!("report has {} metrics", report.metrics.len());

    tracing::info!(
        "All of `report` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}
