//! File-driven custom batteries.
//!
//! Line-oriented text format: `#` starts a comment, whitespace separates
//! tokens, and a record runs from a test name through its `key=value`
//! pairs to the literal token `end`. The reserved record
//! `battery name=<label> end` sets the displayed battery name. Integer
//! values may carry `_` digit separators.

use thiserror::Error;

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

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {line}: unknown test name '{name}'")]
    UnknownTest { line: usize, name: String },
    #[error("line {line}: missing required key '{key}' for '{test}'")]
    MissingKey {
        line: usize,
        test: String,
        key: &'static str,
    },
    #[error("line {line}: bad value for '{key}': {message}")]
    BadValue {
        line: usize,
        key: String,
        message: String,
    },
    #[error("line {line}: unknown key '{key}' for '{test}'")]
    UnknownKey {
        line: usize,
        test: String,
        key: String,
    },
    #[error("line {line}: token '{token}' is not a key=value pair")]
    MalformedToken { line: usize, token: String },
    #[error("line {line}: record not terminated with 'end'")]
    Unterminated { line: usize },
}

/// One parsed record: the test name, the line it starts on, and its
/// key=value pairs.
struct Record {
    name: String,
    line: usize,
    pairs: Vec<(String, String, usize)>,
    consumed: Vec<bool>,
}

impl Record {
    fn lookup(&mut self, key: &str) -> Option<(String, usize)> {
        for (i, (k, v, line)) in self.pairs.iter().enumerate() {
            if k == key {
                self.consumed[i] = true;
                return Some((v.clone(), *line));
            }
        }
        None
    }

    fn required(&mut self, key: &'static str) -> Result<(String, usize), ConfigError> {
        self.lookup(key).ok_or(ConfigError::MissingKey {
            line: self.line,
            test: self.name.clone(),
            key,
        })
    }

    fn req_u64(&mut self, key: &'static str) -> Result<u64, ConfigError> {
        let (value, line) = self.required(key)?;
        parse_u64(&value).map_err(|message| ConfigError::BadValue {
            line,
            key: key.to_string(),
            message,
        })
    }

    fn req_u32(&mut self, key: &'static str) -> Result<u32, ConfigError> {
        let (value, line) = self.required(key)?;
        parse_u64(&value)
            .and_then(|v| u32::try_from(v).map_err(|_| "value does not fit in 32 bits".to_string()))
            .map_err(|message| ConfigError::BadValue {
                line,
                key: key.to_string(),
                message,
            })
    }

    fn opt_u32(&mut self, key: &'static str) -> Result<Option<u32>, ConfigError> {
        match self.lookup(key) {
            None => Ok(None),
            Some((value, line)) => parse_u64(&value)
                .and_then(|v| {
                    u32::try_from(v).map_err(|_| "value does not fit in 32 bits".to_string())
                })
                .map(Some)
                .map_err(|message| ConfigError::BadValue {
                    line,
                    key: key.to_string(),
                    message,
                }),
        }
    }

    fn req_f64(&mut self, key: &'static str) -> Result<f64, ConfigError> {
        let (value, line) = self.required(key)?;
        value
            .replace('_', "")
            .parse::<f64>()
            .map_err(|e| ConfigError::BadValue {
                line,
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    /// Remaining unconsumed keys are an error; the key set per test is
    /// closed.
    fn finish(self) -> Result<(), ConfigError> {
        for (i, (k, _, line)) in self.pairs.iter().enumerate() {
            if !self.consumed[i] {
                return Err(ConfigError::UnknownKey {
                    line: *line,
                    test: self.name,
                    key: k.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Integer literal with optional `_` separators.
fn parse_u64(text: &str) -> Result<u64, String> {
    let cleaned = text.replace('_', "");
    if cleaned.is_empty() {
        return Err("empty integer literal".to_string());
    }
    cleaned.parse::<u64>().map_err(|e| e.to_string())
}

/// Parse a battery definition from text.
pub fn parse_battery(text: &str) -> Result<TestsBattery, ConfigError> {
    let mut battery_name = "custom".to_string();
    let mut tests = Vec::new();

    let mut record: Option<Record> = None;
    for (lineno, raw_line) in text.lines().enumerate() {
        let lineno = lineno + 1;
        let line = match raw_line.find('#') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        for token in line.split_whitespace() {
            if token == "end"
                && let Some(rec) = record.take()
            {
                if rec.name == "battery" {
                    battery_name = finish_battery_record(rec)?;
                } else {
                    tests.push(build_test(rec)?);
                }
                continue;
            }
            match record.as_mut() {
                None => {
                    record = Some(Record {
                        name: token.to_string(),
                        line: lineno,
                        pairs: Vec::new(),
                        consumed: Vec::new(),
                    });
                }
                Some(rec) => {
                    if let Some((key, value)) = token.split_once('=') {
                        rec.pairs
                            .push((key.to_string(), value.to_string(), lineno));
                        rec.consumed.push(false);
                    } else {
                        return Err(ConfigError::MalformedToken {
                            line: lineno,
                            token: token.to_string(),
                        });
                    }
                }
            }
        }
    }
    if let Some(rec) = record {
        return Err(ConfigError::Unterminated { line: rec.line });
    }

    Ok(TestsBattery {
        name: battery_name,
        tests,
    })
}

fn finish_battery_record(mut rec: Record) -> Result<String, ConfigError> {
    let (name, _) = rec.required("name")?;
    rec.finish()?;
    Ok(name)
}

/// Validate the finished options through the test's own range checks,
/// anchoring errors to the record's first line.
fn described(
    rec: Record,
    test: impl crate::stattests::StatTest + 'static,
) -> Result<TestDescription, ConfigError> {
    let line = rec.line;
    rec.finish()?;
    if let Err(message) = test.validate() {
        return Err(ConfigError::BadValue {
            line,
            key: "<options>".to_string(),
            message,
        });
    }
    Ok(TestDescription::new(test, 0, RamClass::Lo))
}

fn build_test(mut rec: Record) -> Result<TestDescription, ConfigError> {
    match rec.name.as_str() {
        "monobit_freq" => {
            let nvalues = rec.req_u64("nvalues")?;
            described(rec, MonobitFreq { nvalues })
        }
        "nbit_words_freq" => {
            let bits_per_word = rec.req_u32("bits_per_word")?;
            let average_freq = rec.req_f64("average_freq")?;
            let nblocks = rec.req_u64("nblocks")? as usize;
            described(
                rec,
                NbitWordsFreq {
                    bits_per_word,
                    average_freq,
                    nblocks,
                },
            )
        }
        "bytes_freq" => {
            let average_freq = rec.req_f64("average_freq")?;
            let nblocks = rec.req_u64("nblocks")? as usize;
            described(rec, NbitWordsFreq::bytes(average_freq, nblocks))
        }
        "words16_freq" => {
            let average_freq = rec.req_f64("average_freq")?;
            let nblocks = rec.req_u64("nblocks")? as usize;
            described(rec, NbitWordsFreq::words16(average_freq, nblocks))
        }
        "blockfreq" => {
            let defaults = BlockFreq::default();
            let log2_block = rec.opt_u32("log2_block")?.unwrap_or(defaults.log2_block);
            let max_nblocks = rec.opt_u32("max_nblocks")?.unwrap_or(defaults.max_nblocks);
            described(
                rec,
                BlockFreq {
                    log2_block,
                    max_nblocks,
                    stop_p: defaults.stop_p,
                },
            )
        }
        "bspace_nd" => {
            let nbits_per_dim = rec.req_u32("nbits_per_dim")?;
            let ndims = rec.req_u32("ndims")?;
            let nsamples = rec.req_u32("nsamples")?;
            let high_bits = match rec.lookup("bits") {
                None => false,
                Some((v, line)) => match v.as_str() {
                    "low" => false,
                    "high" => true,
                    other => {
                        return Err(ConfigError::BadValue {
                            line,
                            key: "bits".to_string(),
                            message: format!("'{other}' is not one of low, high"),
                        });
                    }
                },
            };
            described(
                rec,
                BspaceNd {
                    nbits_per_dim,
                    ndims,
                    nsamples,
                    high_bits,
                },
            )
        }
        "bspace4_8d_decimated" => {
            let step = rec.req_u32("step")?;
            let nsamples = rec.req_u32("nsamples")?;
            described(rec, Bspace4x8Decimated { step, nsamples })
        }
        "birthday_test" => {
            let log2_n = rec.opt_u32("log2_n")?;
            described(rec, BirthdayTest { log2_n })
        }
        "collision_over" => {
            let n = rec.req_u64("n")?;
            let nbits_per_dim = rec.req_u32("nbits_per_dim")?;
            let ndims = rec.req_u32("ndims")?;
            let nsamples = rec.req_u32("nsamples")?;
            described(
                rec,
                CollisionOver {
                    n,
                    nbits_per_dim,
                    ndims,
                    nsamples,
                },
            )
        }
        "gap" => {
            let shl = rec.req_u32("shl")?;
            let ngaps = rec.req_u64("ngaps")?;
            described(rec, Gap { shl, ngaps })
        }
        "gap16_count0" => {
            let ngaps = rec.req_u64("ngaps")?;
            described(rec, Gap16Count0 { ngaps })
        }
        "linear_complexity" => {
            let nbits = rec.req_u64("nbits")?;
            let nseq = rec.opt_u32("nseq")?.unwrap_or(64);
            let bitpos = match rec.lookup("bitpos") {
                None => BitPos::Low,
                Some((v, line)) => match v.as_str() {
                    "low" => BitPos::Low,
                    "mid" => BitPos::Mid,
                    "high" => BitPos::High,
                    other => match parse_u64(other) {
                        Ok(b) if b < 64 => BitPos::Fixed(b as u32),
                        _ => {
                            return Err(ConfigError::BadValue {
                                line,
                                key: "bitpos".to_string(),
                                message: format!(
                                    "'{other}' is not one of low, mid, high or a bit index 0..64"
                                ),
                            });
                        }
                    },
                },
            };
            described(rec, LinearComplexity { nbits, nseq, bitpos })
        }
        "matrix_rank" => {
            let dim = rec.req_u64("dim")? as usize;
            let max_nbits = rec.req_u32("max_nbits")?;
            let nmatrices = rec.req_u32("nmatrices")?;
            described(
                rec,
                MatrixRank {
                    dim,
                    max_nbits,
                    nmatrices,
                },
            )
        }
        "hamming_ot" => {
            let (mode_text, line) = rec.required("mode")?;
            let mode = match mode_text.as_str() {
                "values" => HammingOtMode::Values,
                "bytes" => HammingOtMode::Bytes,
                "bytes_low1" => HammingOtMode::BytesLow1,
                "bytes_low8" => HammingOtMode::BytesLow8,
                other => {
                    return Err(ConfigError::BadValue {
                        line,
                        key: "mode".to_string(),
                        message: format!(
                            "'{other}' is not one of values, bytes, bytes_low1, bytes_low8"
                        ),
                    });
                }
            };
            let nvalues = rec.req_u64("nvalues")?;
            described(rec, HammingOt { mode, nvalues })
        }
        "hamming_ot_long" => {
            let (word_text, line) = rec.required("word")?;
            let word = match word_text.as_str() {
                "w128" => LongWordSize::W128,
                "w256" => LongWordSize::W256,
                "w512" => LongWordSize::W512,
                "w1024" => LongWordSize::W1024,
                other => {
                    return Err(ConfigError::BadValue {
                        line,
                        key: "word".to_string(),
                        message: format!("'{other}' is not one of w128, w256, w512, w1024"),
                    });
                }
            };
            let nvalues = rec.req_u64("nvalues")?;
            described(rec, HammingOtLong { word, nvalues })
        }
        "hamming_distr" => {
            let nlevels = rec.req_u32("nlevels")?;
            let nblocks = rec.req_u64("nblocks")?;
            described(rec, HammingDistr { nlevels, nblocks })
        }
        "mod3" => {
            let nvalues = rec.req_u64("nvalues")?;
            described(rec, Mod3 { nvalues })
        }
        "sum_collector" => {
            let g = rec.req_f64("g")?;
            let nsamples = rec.req_u64("nsamples")?;
            described(rec, SumCollector { g, nsamples })
        }
        "ising_2d" => {
            let (algo_text, line) = rec.required("algorithm")?;
            let algorithm = match algo_text.as_str() {
                "wolff" => IsingAlgorithm::Wolff,
                "metropolis" => IsingAlgorithm::Metropolis,
                other => {
                    return Err(ConfigError::BadValue {
                        line,
                        key: "algorithm".to_string(),
                        message: format!("'{other}' is not one of wolff, metropolis"),
                    });
                }
            };
            let sample_len = rec.req_u32("sample_len")?;
            let nsamples = rec.req_u32("nsamples")?;
            described(
                rec,
                Ising2d {
                    algorithm,
                    sample_len,
                    nsamples,
                },
            )
        }
        "sphere_volume" => {
            let ndims = rec.req_u32("ndims")?;
            let npoints = rec.req_u64("npoints")?;
            described(rec, SphereVolume { ndims, npoints })
        }
        _ => Err(ConfigError::UnknownTest {
            line: rec.line,
            name: rec.name,
        }),
    }
}
