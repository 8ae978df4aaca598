//! Per-record threshold evaluation.

use noodles_vcf as vcf;

use crate::conf::Thresholds;

/// The fields of a VCF record that the threshold filter looks at.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantRecord {
    /// Chromosome name.
    pub chrom: String,
    /// 1-based position.
    pub pos: usize,
    /// Reference allele.
    pub reference: String,
    /// First alternate allele.
    pub alternative: String,
    /// Variant quality (`QUAL`).
    pub quality: Option<f32>,
    /// Read depth (`FORMAT/DP`) of the first sample.
    pub depth: Option<i32>,
    /// Reference and first alternate allelic depth (`FORMAT/AD`) of the first
    /// sample.
    pub allelic_depths: Option<(i32, i32)>,
}

impl VariantRecord {
    /// Extract the fields from a VCF record.
    ///
    /// Missing fields are kept as `None`.  Missing values within `FORMAT/AD`
    /// count as zero; fewer than two values count as missing.
    pub fn from_vcf(record: &vcf::Record) -> Self {
        use vcf::record::genotypes::keys::key;
        use vcf::record::genotypes::sample::{value::Array, Value};

        let sample = record.genotypes().values().next();

        let depth = match sample
            .as_ref()
            .and_then(|sample| sample.get(&key::READ_DEPTH))
        {
            Some(Some(Value::Integer(dp))) => Some(*dp),
            _ => None,
        };
        let allelic_depths = match sample
            .as_ref()
            .and_then(|sample| sample.get(&key::READ_DEPTHS))
        {
            Some(Some(Value::Array(Array::Integer(ad)))) if ad.len() >= 2 => {
                Some((ad[0].unwrap_or(0), ad[1].unwrap_or(0)))
            }
            _ => None,
        };

        Self {
            chrom: record.chromosome().to_string(),
            pos: usize::from(record.position()),
            reference: record.reference_bases().to_string(),
            alternative: record
                .alternate_bases()
                .first()
                .map(|allele| allele.to_string())
                .unwrap_or_default(),
            quality: record.quality_score().map(f32::from),
            depth,
            allelic_depths,
        }
    }
}

/// Reason for a record failing the threshold filter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    enum_map::Enum,
    strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailReason {
    /// No `FORMAT/DP` value.
    MissingDepthField,
    /// No usable `FORMAT/AD` value.
    MissingAllelicDepthField,
    /// `FORMAT/DP` below minimal depth.
    BelowDepth,
    /// Alternate allele fraction below threshold.
    BelowAlleleFraction,
    /// No `QUAL` value.
    MissingQuality,
    /// `QUAL` below minimal quality.
    BelowQuality,
    /// The record could not be parsed.
    MalformedRecord,
}

/// Result of evaluating one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Pass,
    Fail(FailReason),
}

impl Decision {
    pub fn is_pass(&self) -> bool {
        matches!(self, Decision::Pass)
    }
}

/// Alternate allele fraction, zero if there is no coverage at all.
pub fn allele_fraction(ref_count: i32, alt_count: i32) -> f64 {
    let total = ref_count as i64 + alt_count as i64;
    if total > 0 {
        alt_count as f64 / total as f64
    } else {
        0.0
    }
}

/// Evaluate `record` against `thresholds`.
///
/// Depth is checked first, then allele fraction, then quality.  The first
/// failing check determines the reason.
pub fn evaluate(record: &VariantRecord, thresholds: &Thresholds) -> Decision {
    let Some(depth) = record.depth else {
        return Decision::Fail(FailReason::MissingDepthField);
    };
    if depth < thresholds.min_depth {
        return Decision::Fail(FailReason::BelowDepth);
    }

    let Some((ref_count, alt_count)) = record.allelic_depths else {
        return Decision::Fail(FailReason::MissingAllelicDepthField);
    };
    if allele_fraction(ref_count, alt_count) < thresholds.min_allele_fraction {
        return Decision::Fail(FailReason::BelowAlleleFraction);
    }

    let Some(quality) = record.quality else {
        return Decision::Fail(FailReason::MissingQuality);
    };
    if quality < thresholds.min_quality {
        return Decision::Fail(FailReason::BelowQuality);
    }

    Decision::Pass
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{Decision, FailReason::*, VariantRecord};
    use crate::conf::Thresholds;

    fn record(
        depth: Option<i32>,
        allelic_depths: Option<(i32, i32)>,
        quality: Option<f32>,
    ) -> VariantRecord {
        VariantRecord {
            chrom: "chr1".into(),
            pos: 100,
            reference: "A".into(),
            alternative: "G".into(),
            quality,
            depth,
            allelic_depths,
        }
    }

    #[rstest]
    #[case(Some(20), Some((10, 10)), Some(40.0), Decision::Pass)]
    #[case(Some(10), Some((7, 3)), Some(30.0), Decision::Pass)]
    #[case(None, Some((10, 10)), Some(40.0), Decision::Fail(MissingDepthField))]
    #[case(Some(9), Some((10, 10)), Some(40.0), Decision::Fail(BelowDepth))]
    #[case(Some(9), None, None, Decision::Fail(BelowDepth))]
    #[case(Some(9), Some((0, 0)), Some(1.0), Decision::Fail(BelowDepth))]
    #[case(Some(20), None, Some(40.0), Decision::Fail(MissingAllelicDepthField))]
    #[case(Some(20), None, None, Decision::Fail(MissingAllelicDepthField))]
    #[case(Some(20), Some((0, 0)), Some(40.0), Decision::Fail(BelowAlleleFraction))]
    #[case(Some(20), Some((18, 2)), Some(40.0), Decision::Fail(BelowAlleleFraction))]
    #[case(Some(20), Some((10, 10)), None, Decision::Fail(MissingQuality))]
    #[case(Some(20), Some((10, 10)), Some(29.9), Decision::Fail(BelowQuality))]
    fn evaluate(
        #[case] depth: Option<i32>,
        #[case] allelic_depths: Option<(i32, i32)>,
        #[case] quality: Option<f32>,
        #[case] expected: Decision,
    ) {
        let actual = super::evaluate(
            &record(depth, allelic_depths, quality),
            &Thresholds::default(),
        );

        assert_eq!(actual, expected);
    }

    #[test]
    fn below_depth_regardless_of_other_fields() {
        let thresholds = Thresholds::default();
        for allelic_depths in [None, Some((0, 0)), Some((0, 100)), Some((100, 0))] {
            for quality in [None, Some(0.0), Some(100.0)] {
                assert_eq!(
                    super::evaluate(&record(Some(1), allelic_depths, quality), &thresholds),
                    Decision::Fail(BelowDepth)
                );
            }
        }
    }

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(10, 0, 0.0)]
    #[case(0, 10, 1.0)]
    #[case(7, 3, 0.3)]
    #[case(1, 2, 2.0 / 3.0)]
    fn allele_fraction(#[case] ref_count: i32, #[case] alt_count: i32, #[case] expected: f64) {
        let actual = super::allele_fraction(ref_count, alt_count);

        assert!(float_cmp::approx_eq!(f64, expected, actual, ulps = 2));
    }

    #[test]
    fn from_vcf() -> Result<(), anyhow::Error> {
        use noodles_vcf as vcf;

        let vcf_text = format!(
            "{}{}\n{}\n{}\n",
            crate::common::noodles::testing::HEADER,
            "chr1\t100\t.\tA\tG,T\t40\tPASS\t.\tGT:DP:AD\t0/1:20:8,12,0",
            "chr1\t200\t.\tC\tT\t.\tPASS\t.\tGT:AD\t0/1:.,5",
            "chr1\t300\t.\tG\tA\t12.5\tPASS\t.\tGT:DP\t0/1:7",
        );
        let mut reader = vcf::Reader::new(vcf_text.as_bytes());
        let header = reader.read_header()?;
        let records = reader
            .records(&header)
            .map(|record| record.map(|record| VariantRecord::from_vcf(&record)))
            .collect::<Result<Vec<_>, _>>()?;

        assert_eq!(
            records,
            vec![
                VariantRecord {
                    chrom: "chr1".into(),
                    pos: 100,
                    reference: "A".into(),
                    alternative: "G".into(),
                    quality: Some(40.0),
                    depth: Some(20),
                    allelic_depths: Some((8, 12)),
                },
                VariantRecord {
                    chrom: "chr1".into(),
                    pos: 200,
                    reference: "C".into(),
                    alternative: "T".into(),
                    quality: None,
                    depth: None,
                    allelic_depths: Some((0, 5)),
                },
                VariantRecord {
                    chrom: "chr1".into(),
                    pos: 300,
                    reference: "G".into(),
                    alternative: "A".into(),
                    quality: Some(12.5),
                    depth: Some(7),
                    allelic_depths: None,
                },
            ]
        );

        Ok(())
    }
}
