//! Built-in batteries.

use crate::battery::{RamClass, TestDescription, TestsBattery};
use crate::stattests::bspace::{BirthdayTest, Bspace4x8Decimated, BspaceNd};
use crate::stattests::collision::CollisionOver;
use crate::stattests::frequency::{BlockFreq, MonobitFreq, NbitWordsFreq};
use crate::stattests::gap::{Gap, Gap16Count0};
use crate::stattests::hamming::{HammingOt, HammingOtLong, HammingOtMode, LongWordSize};
use crate::stattests::hamming_distr::HammingDistr;
use crate::stattests::ising::{Ising2d, IsingAlgorithm};
use crate::stattests::linear::{BitPos, LinearComplexity};
use crate::stattests::mod3::Mod3;
use crate::stattests::rank::MatrixRank;
use crate::stattests::sphere::SphereVolume;
use crate::stattests::sumcoll::SumCollector;

/// Look up a built-in battery by name.
pub fn find_battery(name: &str) -> Option<TestsBattery> {
    match name {
        "brief" => Some(brief_battery()),
        "full" => Some(full_battery()),
        _ => None,
    }
}

/// Quick smoke battery: a representative of every family at sizes that
/// finish within a few minutes on one workstation core.
pub fn brief_battery() -> TestsBattery {
    TestsBattery {
        name: "brief".to_string(),
        tests: vec![
            TestDescription::new(MonobitFreq { nvalues: 1 << 24 }, 1, RamClass::Lo),
            TestDescription::new(NbitWordsFreq::bytes(50.0, 64), 2, RamClass::Lo),
            TestDescription::new(NbitWordsFreq::words16(20.0, 16), 10, RamClass::Lo),
            TestDescription::new(
                BspaceNd {
                    nbits_per_dim: 16,
                    ndims: 2,
                    nsamples: 32,
                    high_bits: false,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                Bspace4x8Decimated {
                    step: 1,
                    nsamples: 16,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                CollisionOver {
                    n: 1 << 22,
                    nbits_per_dim: 10,
                    ndims: 3,
                    nsamples: 2,
                },
                10,
                RamClass::Med,
            ),
            TestDescription::new(
                Gap {
                    shl: 6,
                    ngaps: 1_000_000,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(Gap16Count0 { ngaps: 16_000_000 }, 20, RamClass::Med),
            TestDescription::new(
                LinearComplexity {
                    nbits: 1000,
                    nseq: 200,
                    bitpos: BitPos::Mid,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                MatrixRank {
                    dim: 32,
                    max_nbits: 32,
                    nmatrices: 2000,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                HammingOt {
                    mode: HammingOtMode::Values,
                    nvalues: 1 << 25,
                },
                10,
                RamClass::Lo,
            ),
            TestDescription::new(
                HammingDistr {
                    nlevels: 6,
                    nblocks: 100_000,
                },
                15,
                RamClass::Lo,
            ),
            TestDescription::new(Mod3 { nvalues: 1 << 23 }, 10, RamClass::Lo),
            TestDescription::new(
                SumCollector {
                    g: 4.0,
                    nsamples: 400_000,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                Ising2d {
                    algorithm: IsingAlgorithm::Wolff,
                    sample_len: 500,
                    nsamples: 64,
                },
                20,
                RamClass::Lo,
            ),
            TestDescription::new(
                SphereVolume {
                    ndims: 8,
                    npoints: 2_000_000,
                },
                5,
                RamClass::Lo,
            ),
            TestDescription::new(
                BlockFreq {
                    log2_block: 22,
                    max_nblocks: 4,
                    stop_p: 1e-8,
                },
                10,
                RamClass::Lo,
            ),
        ],
    }
}

/// Full battery: wider coverage per family at production sizes; hours of
/// wall clock on a workstation.
pub fn full_battery() -> TestsBattery {
    let mut tests = vec![
        TestDescription::new(MonobitFreq { nvalues: 1 << 28 }, 10, RamClass::Lo),
        TestDescription::new(NbitWordsFreq::bytes(100.0, 256), 30, RamClass::Lo),
        TestDescription::new(NbitWordsFreq::words16(50.0, 64), 120, RamClass::Lo),
    ];
    for (d, k, high) in [(16u32, 2u32, false), (16, 2, true), (21, 3, false), (8, 8, false)] {
        tests.push(TestDescription::new(
            BspaceNd {
                nbits_per_dim: d,
                ndims: k,
                nsamples: 64,
                high_bits: high,
            },
            60,
            RamClass::Med,
        ));
    }
    for step in [1u32, 3, 5] {
        tests.push(TestDescription::new(
            Bspace4x8Decimated {
                step,
                nsamples: 64,
            },
            60,
            RamClass::Lo,
        ));
    }
    tests.extend([
        TestDescription::new(
            CollisionOver {
                n: 50_000_000,
                nbits_per_dim: 13,
                ndims: 3,
                nsamples: 3,
            },
            120,
            RamClass::Hi,
        ),
        TestDescription::new(
            Gap {
                shl: 9,
                ngaps: 10_000_000,
            },
            60,
            RamClass::Lo,
        ),
        TestDescription::new(
            Gap {
                shl: 14,
                ngaps: 1_000_000,
            },
            120,
            RamClass::Lo,
        ),
        TestDescription::new(Gap16Count0 { ngaps: 100_000_000 }, 300, RamClass::Med),
        TestDescription::new(
            LinearComplexity {
                nbits: 5000,
                nseq: 256,
                bitpos: BitPos::Low,
            },
            120,
            RamClass::Lo,
        ),
        TestDescription::new(
            LinearComplexity {
                nbits: 5000,
                nseq: 256,
                bitpos: BitPos::High,
            },
            120,
            RamClass::Lo,
        ),
        TestDescription::new(
            MatrixRank {
                dim: 64,
                max_nbits: 64,
                nmatrices: 20_000,
            },
            120,
            RamClass::Lo,
        ),
    ]);
    for mode in [
        HammingOtMode::Values,
        HammingOtMode::Bytes,
        HammingOtMode::BytesLow8,
        HammingOtMode::BytesLow1,
    ] {
        tests.push(TestDescription::new(
            HammingOt {
                mode,
                nvalues: 1 << 27,
            },
            120,
            RamClass::Lo,
        ));
    }
    for word in [
        LongWordSize::W128,
        LongWordSize::W256,
        LongWordSize::W512,
        LongWordSize::W1024,
    ] {
        tests.push(TestDescription::new(
            HammingOtLong {
                word,
                nvalues: 1 << 25,
            },
            120,
            RamClass::Lo,
        ));
    }
    tests.extend([
        TestDescription::new(
            HammingDistr {
                nlevels: 10,
                nblocks: 1_000_000,
            },
            300,
            RamClass::Lo,
        ),
        TestDescription::new(Mod3 { nvalues: 1 << 28 }, 120, RamClass::Lo),
        TestDescription::new(
            SumCollector {
                g: 4.0,
                nsamples: 10_000_000,
            },
            120,
            RamClass::Lo,
        ),
        TestDescription::new(
            Ising2d {
                algorithm: IsingAlgorithm::Wolff,
                sample_len: 1000,
                nsamples: 256,
            },
            300,
            RamClass::Lo,
        ),
        TestDescription::new(
            Ising2d {
                algorithm: IsingAlgorithm::Metropolis,
                sample_len: 1000,
                nsamples: 256,
            },
            600,
            RamClass::Lo,
        ),
    ]);
    for d in [4u32, 8, 16] {
        tests.push(TestDescription::new(
            SphereVolume {
                ndims: d,
                npoints: 100_000_000,
            },
            120,
            RamClass::Lo,
        ));
    }
    tests.extend([
        TestDescription::new(BirthdayTest { log2_n: None }, 1800, RamClass::Hi),
        TestDescription::new(BlockFreq::default(), 600, RamClass::Lo),
    ]);
    TestsBattery {
        name: "full".to_string(),
        tests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(find_battery("brief").is_some());
        assert!(find_battery("full").is_some());
        assert!(find_battery("nope").is_none());
    }

    #[test]
    fn test_all_preset_options_validate() {
        for battery in [brief_battery(), full_battery()] {
            for desc in &battery.tests {
                desc.test
                    .validate()
                    .unwrap_or_else(|e| panic!("{}: {e}", desc.name));
            }
        }
    }

    #[test]
    fn test_every_family_is_present_in_full() {
        let battery = full_battery();
        let names: Vec<&str> = battery.tests.iter().map(|d| d.name.as_str()).collect();
        for required in [
            "monobit_freq",
            "nbit_words_freq",
            "bspace_nd",
            "bspace4_8d_decimated",
            "collision_over",
            "gap",
            "gap16_count0",
            "linear_complexity",
            "matrix_rank",
            "hamming_ot",
            "hamming_ot_long",
            "hamming_distr",
            "mod3",
            "sum_collector",
            "ising_2d",
            "sphere_volume",
            "birthday_test",
            "blockfreq",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }
}
