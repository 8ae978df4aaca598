//! Projection of annotator output to the normalized table.

use std::path::{Path, PathBuf};

use crate::{common, conf::ColumnSpec};

/// File name suffix of normalized tables.
pub const NORMALIZED_SUFFIX: &str = ".normalized.tsv";

/// Error type for the column projector.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not read annotated table {0:?}: {1}")]
    Read(PathBuf, String),
    #[error("annotated table {path:?} line {line}: expected at least {expected} columns, found {found}")]
    TooFewColumns {
        path: PathBuf,
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("could not write normalized table {0:?}: {1}")]
    Write(PathBuf, String),
    #[error("could not clean up intermediate files: {0}")]
    Cleanup(#[from] std::io::Error),
}

/// Projects a fixed, ordered set of columns out of annotated tables.
#[derive(Debug, Clone)]
pub struct Projector {
    columns: Vec<ColumnSpec>,
    /// Minimal number of columns each input row must have.
    min_columns: usize,
}

impl Projector {
    pub fn new(columns: &[ColumnSpec]) -> Self {
        Self {
            columns: columns.to_vec(),
            min_columns: columns.iter().map(|c| c.index + 1).max().unwrap_or(0),
        }
    }

    /// Header of the normalized table.
    pub fn header(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Project `path_in` into a tab-separated `path_out`, return number of rows.
    ///
    /// The first line of `path_in` is the annotator header and is replaced by
    /// the configured column names.
    pub fn project(&self, path_in: &Path, path_out: &Path) -> Result<usize, Error> {
        let read_err = |e: &dyn std::fmt::Display| Error::Read(path_in.to_path_buf(), e.to_string());
        let write_err =
            |e: &dyn std::fmt::Display| Error::Write(path_out.to_path_buf(), e.to_string());

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .from_reader(common::open_read_maybe_gz(path_in).map_err(|e| read_err(&e))?);
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(common::io::open_write_maybe_gz(path_out).map_err(|e| write_err(&e))?);

        let header = reader.headers().map_err(|e| read_err(&e))?;
        self.check_len(path_in, 1, header.len())?;
        writer
            .write_record(self.header())
            .map_err(|e| write_err(&e))?;

        let mut count = 0;
        for record in reader.records() {
            let record = record.map_err(|e| read_err(&e))?;
            let line = record.position().map(|pos| pos.line()).unwrap_or_default();
            self.check_len(path_in, line, record.len())?;
            writer
                .write_record(
                    self.columns
                        .iter()
                        .map(|column| record.get(column.index).unwrap_or_default()),
                )
                .map_err(|e| write_err(&e))?;
            count += 1;
        }
        writer.flush().map_err(|e| write_err(&e))?;

        Ok(count)
    }

    fn check_len(&self, path: &Path, line: u64, found: usize) -> Result<(), Error> {
        if found < self.min_columns {
            Err(Error::TooFewColumns {
                path: path.to_path_buf(),
                line,
                expected: self.min_columns,
                found,
            })
        } else {
            Ok(())
        }
    }
}

/// Remove all files in `dir` named `{stem}.*` except for `keep`.
///
/// Returns the number of removed files.
pub fn remove_intermediates(dir: &Path, stem: &str, keep: Option<&Path>) -> Result<usize, Error> {
    let prefix = format!("{}.", stem);
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if matches && Some(path.as_path()) != keep && path.is_file() {
            tracing::trace!("removing intermediate file {:?}", &path);
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Error, Projector};
    use crate::conf::{default_columns, ColumnSpec, Role};

    const ANNOTATED: &str = "Chr\tStart\tEnd\tRef\tAlt\tFunc.refGene\tGene.refGene\tGeneDetail.refGene\tExonicFunc.refGene\tAAChange.refGene\tCLNALLELEID\tCLNDN\tCLNDISDB\tCLNREVSTAT\tCLNSIG\tREVEL\tOtherinfo1
chr1\t100\t100\tA\tG\texonic\tBRCA1\t.\tnonsynonymous SNV\tBRCA1:NM_007294:exon2:c.A1G:p.M1V\t123\tdisease\tdb\treviewed\tPathogenic\t0.9\tx
chr1\t200\t200\tC\tT\tintronic\tBRCA2\t.\t.\t.\t.\t.\t.\t.\t.\t.\tx
";

    #[test]
    fn project_default_columns() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path_in = tmpdir.join("in.hg38_multianno.txt");
        let path_out = tmpdir.join("in.normalized.tsv");
        std::fs::write(&path_in, ANNOTATED)?;

        let count = Projector::new(&default_columns()).project(&path_in, &path_out)?;

        assert_eq!(count, 2);
        assert_eq!(
            std::fs::read_to_string(&path_out)?,
            "Chr\tStart\tEnd\tRef\tAlt\tFunc.refGene\tGene.refGene\tExonicFunc.refGene\tCLNSIG\tREVEL
chr1\t100\t100\tA\tG\texonic\tBRCA1\tnonsynonymous SNV\tPathogenic\t0.9
chr1\t200\t200\tC\tT\tintronic\tBRCA2\t.\t.\t.
"
        );

        Ok(())
    }

    #[test]
    fn project_ignores_header_text_and_keeps_configured_order() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path_in = tmpdir.join("in.hg38_multianno.txt");
        let path_out = tmpdir.join("in.normalized.tsv");
        std::fs::write(&path_in, "a\tb\tc\n1\t2\t3\n4\t5\t6\n")?;

        let columns = vec![
            ColumnSpec {
                index: 2,
                name: "third".into(),
                role: Role::Gene,
            },
            ColumnSpec {
                index: 0,
                name: "first".into(),
                role: Role::Chromosome,
            },
        ];
        Projector::new(&columns).project(&path_in, &path_out)?;

        let lines = std::fs::read_to_string(&path_out)?
            .lines()
            .map(|line| line.split('\t').map(str::to_string).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(lines, vec![vec!["third", "first"], vec!["3", "1"], vec!["6", "4"]]);

        Ok(())
    }

    #[test]
    fn too_few_columns() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path_in = tmpdir.join("in.hg38_multianno.txt");
        let path_out = tmpdir.join("in.normalized.tsv");
        let mut annotated = ANNOTATED.to_string();
        annotated.push_str("chr1\t300\t300\tG\tA\n");
        std::fs::write(&path_in, annotated)?;

        let result = Projector::new(&default_columns()).project(&path_in, &path_out);

        match result {
            Err(Error::TooFewColumns {
                line,
                expected,
                found,
                ..
            }) => {
                assert_eq!(line, 4);
                assert_eq!(expected, 16);
                assert_eq!(found, 5);
            }
            other => panic!("expected column count error, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn remove_intermediates() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        for name in [
            "in.1234abcd.avinput",
            "in.1234abcd.hg38_multianno.txt",
            "in.1234abcd.hg38_multianno.vcf",
            "in.1234abcd.normalized.tsv",
            "in.1234abcd-1.avinput",
            "other.1234abcd.avinput",
        ] {
            std::fs::write(tmpdir.join(name), "")?;
        }

        let removed = super::remove_intermediates(
            &tmpdir,
            "in.1234abcd",
            Some(tmpdir.join("in.1234abcd.normalized.tsv").as_path()),
        )?;

        assert_eq!(removed, 3);
        let mut remaining = std::fs::read_dir(&*tmpdir)?
            .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "in.1234abcd-1.avinput",
                "in.1234abcd.normalized.tsv",
                "other.1234abcd.avinput",
            ]
        );

        Ok(())
    }
}
