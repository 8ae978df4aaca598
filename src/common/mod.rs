//! Common functionality.

use std::{
    fs::{File, OpenOptions},
    path::Path,
};

use bytesize::ByteSize;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

pub mod io;
pub mod noodles;

pub use io::open_read_maybe_gz;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    let rss = procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.rss * procfs::page_size());
    match rss {
        Ok(rss) => tracing::debug!("RSS now: {}", ByteSize::b(rss)),
        Err(e) => tracing::debug!("could not determine RSS: {}", e),
    }
}

/// Reference genome builds understood by the annotator.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    strum::EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenomeBuild {
    /// hg19 / GRCh37
    Hg19,
    /// hg38 / GRCh38
    #[default]
    Hg38,
}

impl GenomeBuild {
    /// Interpret `raw` as a genome build, falling back to the default build.
    ///
    /// Unsupported values are not an error; they are logged and replaced.
    pub fn resolve(raw: &str) -> Self {
        match raw.parse::<GenomeBuild>() {
            Ok(build) => build,
            Err(_) => {
                let fallback = GenomeBuild::default();
                tracing::warn!(
                    "unsupported genome build {:?}, using {} instead",
                    raw,
                    fallback
                );
                fallback
            }
        }
    }
}

/// Maximal number of generations tried by `create_unique`.
const MAX_GENERATIONS: usize = 10_000;

/// Atomically create a new file `{base}{suffix}` in `dir`.
///
/// If the file already exists then `{base}-1{suffix}`, `{base}-2{suffix}`, ...
/// are tried.  Returns the chosen stem (`base` plus generation marker) and the
/// freshly created file.  Existing files are never truncated.
pub fn create_unique<P>(dir: P, base: &str, suffix: &str) -> std::io::Result<(String, File)>
where
    P: AsRef<Path>,
{
    for generation in 0..MAX_GENERATIONS {
        let stem = if generation == 0 {
            base.to_string()
        } else {
            format!("{}-{}", base, generation)
        };
        let path = dir.as_ref().join(format!("{}{}", stem, suffix));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((stem, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!(
            "no free file name for {}{} in {:?}",
            base,
            suffix,
            dir.as_ref()
        ),
    ))
}

/// Return the version of the `annoflow` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::GenomeBuild;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case("hg19", GenomeBuild::Hg19)]
    #[case("hg38", GenomeBuild::Hg38)]
    #[case("grch37", GenomeBuild::Hg38)]
    #[case("HG19", GenomeBuild::Hg38)]
    #[case("", GenomeBuild::Hg38)]
    fn genome_build_resolve(#[case] raw: &str, #[case] expected: GenomeBuild) {
        assert_eq!(expected, GenomeBuild::resolve(raw));
    }

    #[rstest::rstest]
    #[case(GenomeBuild::Hg19, "hg19")]
    #[case(GenomeBuild::Hg38, "hg38")]
    fn genome_build_display(#[case] build: GenomeBuild, #[case] expected: &str) {
        assert_eq!(expected, build.to_string());
    }

    #[test]
    fn create_unique_never_overwrites() -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();

        let (first, _) = super::create_unique(&*tmp_dir, "sample", ".vcf.gz")?;
        let (second, _) = super::create_unique(&*tmp_dir, "sample", ".vcf.gz")?;
        let (third, _) = super::create_unique(&*tmp_dir, "sample", ".vcf.gz")?;

        assert_eq!(first, "sample");
        assert_eq!(second, "sample-1");
        assert_eq!(third, "sample-2");
        assert!(tmp_dir.join("sample.vcf.gz").exists());
        assert!(tmp_dir.join("sample-1.vcf.gz").exists());
        assert!(tmp_dir.join("sample-2.vcf.gz").exists());

        Ok(())
    }
}
