//! Pipeline configuration.
//!
//! One `Config` value is built at startup (defaults, then optionally a JSON
//! file, then command line overrides) and handed to each component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::GenomeBuild;

/// Thresholds applied to each variant record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimal read depth (`FORMAT/DP`).
    pub min_depth: i32,
    /// Minimal alternate allele fraction computed from `FORMAT/AD`.
    pub min_allele_fraction: f64,
    /// Minimal variant quality (`QUAL`).
    pub min_quality: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_depth: 10,
            min_allele_fraction: 0.3,
            min_quality: 30.0,
        }
    }
}

/// Configuration of the external annotator (ANNOVAR's `table_annovar.pl`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Annotator {
    /// Installation directory of the annotator.
    pub path: Option<PathBuf>,
    /// Program used to run the script, `None` to execute it directly.
    pub interpreter: Option<String>,
    /// Script name, relative to `path`.
    pub program: String,
    /// Database directory, relative to `path`.
    pub humandb: String,
    /// Annotation protocols to run.
    pub protocols: Vec<String>,
    /// Operation for each protocol.
    pub operations: Vec<String>,
    /// Placeholder written for missing values.
    pub nastring: String,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            path: None,
            interpreter: Some("perl".into()),
            program: "table_annovar.pl".into(),
            humandb: "humandb".into(),
            protocols: vec!["refGene".into(), "clinvar_20221231".into(), "revel".into()],
            operations: vec!["g".into(), "f".into(), "f".into()],
            nastring: ".".into(),
        }
    }
}

/// Semantic role of a column in the normalized table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    Chromosome,
    Start,
    End,
    Reference,
    Alternate,
    /// Gene region function, e.g., "exonic" or "intronic".
    Func,
    Gene,
    /// Exonic function, e.g., "synonymous SNV".
    ExonicFunc,
    /// Clinical significance.
    ClinicalSignificance,
    /// Pathogenicity score (REVEL).
    PathogenicityScore,
}

/// One column extracted from the annotator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// 0-based position in the annotator output.
    pub index: usize,
    /// Column name written to the normalized table header.
    pub name: String,
    /// Semantic role of the column.
    pub role: Role,
}

impl ColumnSpec {
    fn new(index: usize, name: &str, role: Role) -> Self {
        Self {
            index,
            name: name.into(),
            role,
        }
    }
}

/// Default columns of `table_annovar.pl` with `refGene,clinvar_20221231,revel`.
pub fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new(0, "Chr", Role::Chromosome),
        ColumnSpec::new(1, "Start", Role::Start),
        ColumnSpec::new(2, "End", Role::End),
        ColumnSpec::new(3, "Ref", Role::Reference),
        ColumnSpec::new(4, "Alt", Role::Alternate),
        ColumnSpec::new(5, "Func.refGene", Role::Func),
        ColumnSpec::new(6, "Gene.refGene", Role::Gene),
        ColumnSpec::new(8, "ExonicFunc.refGene", Role::ExonicFunc),
        ColumnSpec::new(14, "CLNSIG", Role::ClinicalSignificance),
        ColumnSpec::new(15, "REVEL", Role::PathogenicityScore),
    ]
}

/// Error type for configuration validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("column role {0} configured {1} times, expected exactly once")]
    RoleCount(Role, usize),
    #[error("{0} protocols but {1} operations configured")]
    ProtocolOperationMismatch(usize, usize),
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-record filter thresholds.
    pub thresholds: Thresholds,
    /// Reference build identifier, validated with `GenomeBuild::resolve`.
    pub genome_build: String,
    /// External annotator settings.
    pub annotator: Annotator,
    /// Ordered columns of the normalized table.
    #[serde(default = "default_columns")]
    pub columns: Vec<ColumnSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thresholds: Default::default(),
            genome_build: GenomeBuild::default().to_string(),
            annotator: Default::default(),
            columns: default_columns(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file at `path`.
    pub fn from_path<P>(path: P) -> Result<Self, anyhow::Error>
    where
        P: AsRef<Path>,
    {
        let file = std::fs::File::open(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not open config file {:?}: {}", path.as_ref(), e)
        })?;
        let config: Config = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("could not parse config {:?}: {}", path.as_ref(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that each column role is present exactly once and protocols
    /// match operations.
    pub fn validate(&self) -> Result<(), Error> {
        use strum::IntoEnumIterator;

        for role in Role::iter() {
            let count = self.columns.iter().filter(|c| c.role == role).count();
            if count != 1 {
                return Err(Error::RoleCount(role, count));
            }
        }
        if self.annotator.protocols.len() != self.annotator.operations.len() {
            return Err(Error::ProtocolOperationMismatch(
                self.annotator.protocols.len(),
                self.annotator.operations.len(),
            ));
        }

        Ok(())
    }

    /// The resolved genome build.
    pub fn genome_build(&self) -> GenomeBuild {
        GenomeBuild::resolve(&self.genome_build)
    }
}
