use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tuner_conformance::cases::{self, CaseOutcome};
use tuner_conformance::loopback::{LoopbackConfig, LoopbackTuner};
use tuner_conformance::{HarnessConfig, TunerEnvironment};

#[derive(Parser, Debug)]
#[command(author, version, about = "Tuner streaming conformance suite", long_about = None)]
struct Args {
    /// JSON harness config; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only cases whose name contains this string
    #[arg(long)]
    case: Option<String>,

    /// List case names and exit
    #[arg(long)]
    list: bool,

    /// Frontend ids the loopback service reports (e.g., 0,1)
    #[arg(long, value_delimiter = ',', default_value = "0")]
    frontends: Vec<u32>,

    /// Directory for the loopback service's queue files
    #[arg(long)]
    queue_dir: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    env_logger::init();
    let args = Args::parse();

    if args.list {
        for case in cases::CASES {
            println!("{:<28} {}", case.name, case.description);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &args.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };

    let loopback = LoopbackConfig {
        frontend_ids: args.frontends.clone(),
        queue_dir: args.queue_dir.clone().unwrap_or_else(|| config.data_dir()),
        ..LoopbackConfig::default()
    };
    let service = LoopbackTuner::new(loopback).context("Failed to start loopback tuner")?;
    let env = TunerEnvironment::new(Arc::new(service), config);

    let report = cases::run_all(&env, args.case.as_deref());
    for result in &report.results {
        let verdict = match &result.outcome {
            CaseOutcome::Passed => "PASS".to_string(),
            CaseOutcome::Skipped(reason) => format!("SKIP ({reason})"),
            CaseOutcome::Failed(failure) => format!("FAIL ({failure})"),
        };
        println!("{:<28} {verdict}", result.name);
    }
    info!(
        "{} cases: {} passed, {} skipped, {} failed",
        report.results.len(),
        report.passed(),
        report.skipped(),
        report.failed()
    );

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
