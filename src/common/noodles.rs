//! Common utility code for noodles.

use std::path::{Path, PathBuf};

use noodles_bgzf as bgzf;
use noodles_core::Position;
use noodles_csi::{self as csi, binning_index::index::reference_sequence::bin::Chunk};
use noodles_tabix as tabix;
use noodles_vcf as vcf;

/// File name extensions of supported VCF index files, in order of preference.
const INDEX_EXTENSIONS: &[&str] = &["tbi", "csi"];

/// Return path of the companion index of the VCF file at `path`, if any.
pub fn find_index<P>(path: P) -> Option<PathBuf>
where
    P: AsRef<Path>,
{
    INDEX_EXTENSIONS.iter().find_map(|ext| {
        let mut candidate = path.as_ref().as_os_str().to_owned();
        candidate.push(format!(".{}", ext));
        let candidate = PathBuf::from(candidate);
        candidate.exists().then_some(candidate)
    })
}

/// Build TBI for file at `path_src` and write to `path_dst`.
pub fn build_tbi<S, D>(path_src: S, path_dst: D) -> Result<(), anyhow::Error>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    let mut reader = std::fs::File::open(path_src.as_ref())
        .map(bgzf::Reader::new)
        .map(vcf::Reader::new)
        .map_err(|e| anyhow::anyhow!("error input file for tbi creation: {}", e))?;

    let header = reader
        .read_header()
        .map_err(|e| anyhow::anyhow!("error reading header: {}", e))?;

    let mut record = vcf::Record::default();

    let mut indexer = tabix::index::Indexer::default();
    indexer.set_header(csi::binning_index::index::header::Builder::vcf().build());

    let mut start_position = reader.get_ref().virtual_position();

    while reader
        .read_record(&header, &mut record)
        .map_err(|e| anyhow::anyhow!("problem reading record: {}", e))?
        != 0
    {
        let end_position = reader.get_ref().virtual_position();
        let chunk = Chunk::new(start_position, end_position);

        let reference_sequence_name = record.chromosome().to_string();
        let start = Position::try_from(usize::from(record.position()))
            .map_err(|e| anyhow::anyhow!("error converting start position: {}", e))?;
        let end = record
            .end()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .and_then(|position| {
                Position::try_from(usize::from(position))
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })
            .map_err(|e| anyhow::anyhow!("error converting end position: {}", e))?;

        indexer
            .add_record(&reference_sequence_name, start, end, chunk)
            .map_err(|e| anyhow::anyhow!("error adding record to tabix index: {}", e))?;

        start_position = end_position;
    }

    let index = indexer.build();

    let mut writer = std::fs::File::create(path_dst.as_ref())
        .map(tabix::Writer::new)
        .map_err(|e| anyhow::anyhow!("error output file for tbi creation: {}", e))?;
    writer
        .write_index(&index)
        .map_err(|e| anyhow::anyhow!("error writing tabix index: {}", e))?;

    Ok(())
}

/// Test helpers for writing bgzf-compressed and indexed VCF files.
#[cfg(test)]
pub(crate) mod testing {
    use std::{io::Write, path::Path};

    use noodles_bgzf as bgzf;

    /// VCF header used by the test fixtures.
    pub const HEADER: &str = "##fileformat=VCFv4.3
##contig=<ID=chr1,length=248956422>
##contig=<ID=chr2,length=242193529>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">
##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tsample
";

    /// Write `records` (tab-separated VCF lines) as bgzf VCF to `path`.
    ///
    /// When `with_index` is set then a `.tbi` file is written next to it.
    pub fn write_vcf_gz<P>(path: P, records: &[&str], with_index: bool) -> Result<(), anyhow::Error>
    where
        P: AsRef<Path>,
    {
        {
            let mut writer = std::fs::File::create(path.as_ref()).map(bgzf::Writer::new)?;
            writer.write_all(HEADER.as_bytes())?;
            for record in records {
                writer.write_all(record.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.try_finish()?;
        }

        if with_index {
            let mut path_tbi = path.as_ref().as_os_str().to_owned();
            path_tbi.push(".tbi");
            super::build_tbi(path.as_ref(), path_tbi)?;
        }

        Ok(())
    }
}
