use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Arg, ArgAction, Command};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use smokerand::battery::presets;
use smokerand::battery::{ReportType, TestsBattery};
use smokerand::config;
use smokerand::entropy::Entropy;
use smokerand::generator::{CallerApi, StdoutPrinter};
use smokerand::generators;

fn build_cli() -> Command {
    Command::new("smokerand")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Statistical test batteries for pseudorandom number generators")
        .arg(
            Arg::new("generator")
                .long("generator")
                .short('g')
                .value_name("NAME")
                .help("Generator under test (see --list-generators)"),
        )
        .arg(
            Arg::new("battery")
                .long("battery")
                .short('b')
                .value_name("NAME|FILE")
                .help("Built-in battery (brief, full) or file=<path> for a custom battery")
                .default_value("brief"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_name("COUNT")
                .help("Worker threads (default: number of CPU cores)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("test")
                .long("test")
                .short('t')
                .value_name("INDEX")
                .help("Run only the nth test of the battery (one-based; 0 runs all)")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("TEXT")
                .help("Deterministic text seed for the entropy source")
                .conflicts_with("seed-base64"),
        )
        .arg(
            Arg::new("seed-base64")
                .long("seed-base64")
                .value_name("KEY")
                .help("Deterministic 256-bit base64 seed (exactly 44 characters)")
                .conflicts_with("seed"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_name("KIND")
                .help("Report style: table, brief or json")
                .default_value("table"),
        )
        .arg(
            Arg::new("info")
                .long("info")
                .help("Print the battery schedule without running it")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-generators")
                .long("list-generators")
                .help("List the built-in generators and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("audit")
                .long("audit")
                .help("Dump the seed audit log after the run")
                .action(ArgAction::SetTrue),
        )
}

fn make_entropy(matches: &clap::ArgMatches) -> anyhow::Result<Entropy> {
    if let Some(text) = matches.get_one::<String>("seed") {
        return Entropy::from_text(text).context("text seed initialization failed");
    }
    if let Some(b64) = matches.get_one::<String>("seed-base64") {
        return Entropy::from_base64(b64).context("base64 seed initialization failed");
    }
    Entropy::from_system().context("entropy bootstrap failed")
}

fn resolve_battery(selector: &str) -> anyhow::Result<TestsBattery> {
    if let Some(path) = selector.strip_prefix("file=") {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read battery file '{path}'"))?;
        return config::parse_battery(&text).map_err(anyhow::Error::from);
    }
    presets::find_battery(selector).with_context(|| {
        format!("unknown battery '{selector}' (expected brief, full or file=<path>)")
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{}: {err:#}", "ERROR".red());
            // Any setup failure is a battery error.
            std::process::exit(2);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let matches = build_cli().get_matches();

    if matches.get_flag("list-generators") {
        for info in generators::all() {
            println!("{:<12} {:>2}-bit  {}", info.name, info.nbits, info.description);
        }
        return Ok(0);
    }

    let battery = resolve_battery(matches.get_one::<String>("battery").expect("defaulted"))?;

    let entropy = make_entropy(&matches)?;
    let api = CallerApi::new(entropy, Arc::new(StdoutPrinter));

    if matches.get_flag("info") {
        battery.print_info(&api);
        return Ok(0);
    }

    let Some(gen_name) = matches.get_one::<String>("generator") else {
        bail!("no generator selected; use --generator <name> (see --list-generators)");
    };
    let Some(gen_info) = generators::find(gen_name) else {
        bail!("unknown generator '{gen_name}' (see --list-generators)");
    };

    let threads = matches
        .get_one::<usize>("threads")
        .copied()
        .unwrap_or_else(num_cpus::get)
        .max(1);

    let report = match matches.get_one::<String>("report").expect("defaulted").as_str() {
        "table" => ReportType::Table,
        "brief" => ReportType::Brief,
        "json" => ReportType::Json,
        other => bail!("unknown report type '{other}' (expected table, brief or json)"),
    };

    let filter_index = *matches.get_one::<usize>("test").expect("defaulted");
    let verdict = battery.run(gen_info, &api, filter_index, threads, report);

    if matches.get_flag("audit") {
        let entropy = api.lock_entropy();
        for record in entropy.audit_log() {
            println!(
                "seed thread={} value={}",
                record.thread_id,
                hex::encode(record.seed.to_be_bytes())
            );
        }
    }

    Ok(verdict.exit_code())
}
