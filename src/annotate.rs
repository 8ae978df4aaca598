//! Invocation of the external annotator.
//!
//! The annotator is treated as a black box following the calling convention
//! of ANNOVAR's `table_annovar.pl`: it reads a VCF file and writes
//! `{prefix}.{build}_multianno.txt` next to other intermediate files that all
//! start with `{prefix}.`.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use crate::{common::GenomeBuild, conf};

/// Error type for the annotation invoker.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("annotator path not configured")]
    NotConfigured,
    #[error("annotator not found at {0:?}")]
    NotFound(PathBuf),
    #[error("could not start annotator {0:?}: {1}")]
    Spawn(String, #[source] std::io::Error),
    #[error("annotator failed with {status} for {path:?}: {stderr}")]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },
}

/// Return path of the annotated table written for `prefix`.
pub fn annotated_table_path(prefix: &Path, genome_build: GenomeBuild) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(format!(".{}_multianno.txt", genome_build));
    PathBuf::from(path)
}

/// Runs the external annotator.
#[derive(Debug, Clone)]
pub struct Invoker {
    /// Path to the annotator script.
    program: PathBuf,
    /// Path to the annotation databases.
    humandb: PathBuf,
    /// Settings from the configuration.
    conf: conf::Annotator,
}

impl Invoker {
    /// Construct from configuration, checking that the annotator exists.
    pub fn new(conf: &conf::Annotator) -> Result<Self, Error> {
        let path = conf.path.as_ref().ok_or(Error::NotConfigured)?;
        let program = path.join(&conf.program);
        if !program.exists() {
            return Err(Error::NotFound(program));
        }

        Ok(Self {
            program,
            humandb: path.join(&conf.humandb),
            conf: conf.clone(),
        })
    }

    /// Build the command line for annotating `path_in` to `prefix`.
    fn command(&self, path_in: &Path, prefix: &Path, genome_build: GenomeBuild) -> Command {
        let mut cmd = match &self.conf.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.arg(path_in)
            .arg(&self.humandb)
            .arg("-buildver")
            .arg(genome_build.to_string())
            .arg("-out")
            .arg(prefix)
            .arg("-remove")
            .arg("-protocol")
            .arg(self.conf.protocols.join(","))
            .arg("-operation")
            .arg(self.conf.operations.join(","))
            .arg("-nastring")
            .arg(&self.conf.nastring)
            .arg("-vcfinput")
            .arg("-polish");
        cmd
    }

    /// Annotate the VCF file at `path_in`, writing output files to `prefix.*`.
    ///
    /// Returns the path of the annotated table.  Only the exit status is
    /// checked, the table itself is not inspected.
    pub fn run(
        &self,
        path_in: &Path,
        prefix: &Path,
        genome_build: GenomeBuild,
    ) -> Result<PathBuf, Error> {
        let mut cmd = self.command(path_in, prefix, genome_build);
        tracing::debug!("running {:?}", &cmd);

        let before_annotation = std::time::Instant::now();
        let output = cmd
            .output()
            .map_err(|e| Error::Spawn(self.program.display().to_string(), e))?;
        if !output.status.success() {
            return Err(Error::Failed {
                path: path_in.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::debug!(
            "annotated {:?} in {:?}",
            path_in,
            before_annotation.elapsed()
        );

        Ok(annotated_table_path(prefix, genome_build))
    }
}

/// Helpers for running tests against a stand-in annotator script.
#[cfg(all(test, unix))]
pub(crate) mod testing {
    use std::path::Path;

    use crate::conf;

    /// Shell script that mimics `table_annovar.pl` with `-vcfinput`.
    ///
    /// Every record of the input becomes one row.  The gene is taken from the
    /// ID column, inputs with "fail" in their name make it exit with 1.
    const FAKE_ANNOVAR: &str = r#"#!/bin/sh
input="$1"
shift
out=""
build=""
while [ $# -gt 0 ]; do
    case "$1" in
        -out) out="$2"; shift ;;
        -buildver) build="$2"; shift ;;
    esac
    shift
done
case "$(basename "$input")" in
    *fail*) echo "simulated failure" >&2; exit 1 ;;
esac
gzip -dc "$input" | grep -v '^#' > "$out.avinput"
{
    printf 'Chr\tStart\tEnd\tRef\tAlt\tFunc.refGene\tGene.refGene\tGeneDetail.refGene\tExonicFunc.refGene\tAAChange.refGene\tCLNALLELEID\tCLNDN\tCLNDISDB\tCLNREVSTAT\tCLNSIG\tREVEL\tOtherinfo1\n'
    awk -F'\t' 'BEGIN { OFS = "\t" } { print $1, $2, $2, $4, $5, "exonic", $3, ".", "nonsynonymous SNV", ".", ".", ".", ".", ".", "Pathogenic", "0.75", "." }' "$out.avinput"
} > "$out.${build}_multianno.txt"
cp "$out.avinput" "$out.${build}_multianno.vcf"
"#;

    /// Install the fake annotator into `dir`, return matching configuration.
    pub fn install_fake_annovar(dir: &Path) -> Result<conf::Annotator, anyhow::Error> {
        std::fs::create_dir_all(dir.join("humandb"))?;
        std::fs::write(dir.join("table_annovar.pl"), FAKE_ANNOVAR)?;

        Ok(conf::Annotator {
            path: Some(dir.to_path_buf()),
            interpreter: Some("sh".into()),
            ..Default::default()
        })
    }
}
