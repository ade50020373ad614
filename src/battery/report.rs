//! Battery report rendering: the result table, the one-line brief form,
//! and streamed JSON records.

use colored::Colorize;
use num_format::{SystemLocale, ToFormattedString};
use serde::Serialize;

use crate::battery::{CompletedTest, TestVerdict, weighted_z};
use crate::generator::CallerApi;

/// Three significant figures, switching to scientific notation outside
/// the comfortable range.
pub fn format_sig3(x: f64) -> String {
    if x.is_nan() {
        return "n/a".to_string();
    }
    if x == 0.0 {
        return "0.00".to_string();
    }
    let magnitude = x.abs().log10().floor() as i32;
    if (-3..4).contains(&magnitude) {
        let decimals = (2 - magnitude).max(0) as usize;
        format!("{x:.decimals$}")
    } else {
        format!("{x:.2e}")
    }
}

fn verdict_label(verdict: TestVerdict) -> String {
    match verdict {
        TestVerdict::Ok => verdict.as_str().green().to_string(),
        TestVerdict::Suspicious => verdict.as_str().yellow().to_string(),
        TestVerdict::Fail => verdict.as_str().red().to_string(),
    }
}

/// Full result table: index, name, statistic, p, 1-p, verdict.
pub fn print_table(
    api: &CallerApi,
    battery_name: &str,
    generator_name: &str,
    ordered: &[(usize, CompletedTest)],
    elapsed: f64,
) {
    api.print_line(&format!(
        "battery '{battery_name}' over generator '{generator_name}'"
    ));
    api.print_line(&format!(
        "{:>4}  {:<24} {:>10} {:>10} {:>10}  {}",
        "#", "test", "statistic", "p", "1-p", "verdict"
    ));
    for (idx, completed) in ordered {
        let r = &completed.results;
        api.print_line(&format!(
            "{:>4}  {:<24} {:>10} {:>10} {:>10}  {}",
            idx + 1,
            r.name,
            format_sig3(r.x),
            format_sig3(r.p),
            format_sig3(r.alpha),
            verdict_label(TestVerdict::classify(r))
        ));
    }
    api.print_line(&summary_line(ordered, elapsed));
}

/// One line per test plus the summary.
pub fn print_brief(
    api: &CallerApi,
    battery_name: &str,
    ordered: &[(usize, CompletedTest)],
    elapsed: f64,
) {
    for (idx, completed) in ordered {
        let r = &completed.results;
        api.print_line(&format!(
            "{battery_name}[{}] {} p={} {}",
            idx + 1,
            r.name,
            format_sig3(r.p),
            TestVerdict::classify(r).as_str()
        ));
    }
    api.print_line(&summary_line(ordered, elapsed));
}

fn summary_line(ordered: &[(usize, CompletedTest)], elapsed: f64) -> String {
    let nfail = ordered
        .iter()
        .filter(|(_, c)| TestVerdict::classify(&c.results) == TestVerdict::Fail)
        .count();
    let nsusp = ordered
        .iter()
        .filter(|(_, c)| TestVerdict::classify(&c.results) == TestVerdict::Suspicious)
        .count();
    let locale = SystemLocale::default().ok();
    let ntests = match &locale {
        Some(l) => ordered.len().to_formatted_string(l),
        None => ordered.len().to_string(),
    };
    format!(
        "{ntests} tests, {nfail} failed, {nsusp} suspicious, {elapsed:.1}s elapsed"
    )
}

/// NaN-safe f64 for JSON records (serde_json rejects non-finite floats).
fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

#[derive(Serialize)]
struct JsonResultRecord<'a> {
    record: &'static str,
    index: usize,
    name: &'a str,
    statistic: Option<f64>,
    p: Option<f64>,
    alpha: Option<f64>,
    weighted_z: Option<f64>,
    verdict: &'static str,
    seconds: f64,
}

#[derive(Serialize)]
struct JsonSummaryRecord<'a> {
    record: &'static str,
    battery: &'a str,
    generator: &'a str,
    ntests: usize,
    nfailed: usize,
    nsuspicious: usize,
    elapsed_seconds: f64,
}

/// Streamed as each result arrives, in completion order.
pub fn stream_json_record(api: &CallerApi, slot: usize, completed: &CompletedTest) {
    let r = &completed.results;
    let record = JsonResultRecord {
        record: "test",
        index: slot + 1,
        name: r.name,
        statistic: finite(r.x),
        p: finite(r.p),
        alpha: finite(r.alpha),
        weighted_z: finite(weighted_z(r)),
        verdict: TestVerdict::classify(r).as_str(),
        seconds: completed.seconds,
    };
    if let Ok(line) = serde_json::to_string(&record) {
        api.print_line(&line);
    }
}

/// Closing JSON summary after all slots complete.
pub fn print_json_summary(
    api: &CallerApi,
    battery_name: &str,
    generator_name: &str,
    ordered: &[(usize, CompletedTest)],
    elapsed: f64,
) {
    let record = JsonSummaryRecord {
        record: "summary",
        battery: battery_name,
        generator: generator_name,
        ntests: ordered.len(),
        nfailed: ordered
            .iter()
            .filter(|(_, c)| TestVerdict::classify(&c.results) == TestVerdict::Fail)
            .count(),
        nsuspicious: ordered
            .iter()
            .filter(|(_, c)| TestVerdict::classify(&c.results) == TestVerdict::Suspicious)
            .count(),
        elapsed_seconds: elapsed,
    };
    if let Ok(line) = serde_json::to_string(&record) {
        api.print_line(&line);
    }
}
