//! Named conformance cases and the runner that executes them.
//!
//! Every case gets a fresh [`TunerSession`], so a failing case leaves
//! nothing open for the next one.

pub mod fixtures;

use std::fs;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::client::InputConf;
use crate::failure::{CheckResult, Failure};
use crate::hal::{FrontendDvbtSettings, FrontendId, FrontendScanMessage, FrontendSettings};
use crate::session::{FilterConf, TunerEnvironment, TunerSession};

use fixtures::{ScratchFile, StreamFixture};

/// DiSEqC "reset" command addressed to any LNB.
const DISEQC_RESET: &[u8] = &[0xE0, 0x00, 0x00];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Skipped(&'static str),
}

#[derive(Debug)]
pub enum CaseOutcome {
    Passed,
    Skipped(&'static str),
    Failed(Failure),
}

#[derive(Debug)]
pub struct CaseResult {
    pub name: &'static str,
    pub outcome: CaseOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Passed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, CaseOutcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&CaseOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

pub struct Case {
    pub name: &'static str,
    pub description: &'static str,
    run: fn(&TunerEnvironment) -> CheckResult<Verdict>,
}

impl Case {
    pub fn run(&self, env: &TunerEnvironment) -> CaseResult {
        info!("[ RUN      ] {}: {}", self.name, self.description);
        let start = Instant::now();
        let outcome = match (self.run)(env) {
            Ok(Verdict::Passed) => CaseOutcome::Passed,
            Ok(Verdict::Skipped(reason)) => CaseOutcome::Skipped(reason),
            Err(failure) => CaseOutcome::Failed(failure),
        };
        let elapsed = start.elapsed();
        match &outcome {
            CaseOutcome::Passed => info!("[       OK ] {} ({elapsed:?})", self.name),
            CaseOutcome::Skipped(reason) => warn!("[     WARN ] {}: {reason}", self.name),
            CaseOutcome::Failed(failure) => error!("[  FAILED  ] {}: {failure}", self.name),
        }
        CaseResult {
            name: self.name,
            outcome,
            elapsed,
        }
    }
}

pub const CASES: &[Case] = &[
    Case {
        name: "CreateFrontend",
        description: "Create Frontends",
        run: create_frontend,
    },
    Case {
        name: "TuneFrontend",
        description: "Tune Frontends and check callback onEvent",
        run: tune_frontend,
    },
    Case {
        name: "StopTuneFrontend",
        description: "stopTune Frontends",
        run: stop_tune_frontend,
    },
    Case {
        name: "CloseFrontend",
        description: "Close Frontends",
        run: close_frontend,
    },
    Case {
        name: "SendDiseqcMessage",
        description: "Send a DiSEqC message and check callback onDiseqcMessage",
        run: send_diseqc_message,
    },
    Case {
        name: "ScanFrontend",
        description: "Scan Frontends and check callback onScanMessage",
        run: scan_frontend,
    },
    Case {
        name: "CreateDemuxWithFrontend",
        description: "Create Demux with Frontend",
        run: create_demux_with_frontend,
    },
    Case {
        name: "CreateDemux",
        description: "Create Demux",
        run: create_demux,
    },
    Case {
        name: "CloseDemux",
        description: "Close Demux",
        run: close_demux,
    },
    Case {
        name: "CreateDescrambler",
        description: "Create Descrambler",
        run: create_descrambler,
    },
    Case {
        name: "CloseDescrambler",
        description: "Close Descrambler",
        run: close_descrambler,
    },
    Case {
        name: "ReadSectionFilterOutput",
        description: "Read data output from the queue of a Section Filter",
        run: read_section_filter_output,
    },
    Case {
        name: "PlaybackMultiFilter",
        description: "Play back one stream into Section, PES and TS filters",
        run: playback_multi_filter,
    },
    Case {
        name: "PlaybackFromFixture",
        description: "Play back the configured input file against golden files",
        run: playback_from_fixture,
    },
];

/// Runs every case whose name contains `filter` (all of them for `None`).
pub fn run_all(env: &TunerEnvironment, filter: Option<&str>) -> SuiteReport {
    let mut report = SuiteReport::default();
    for case in CASES
        .iter()
        .filter(|case| filter.map_or(true, |f| case.name.contains(f)))
    {
        report.results.push(case.run(env));
    }
    info!(
        "{} passed, {} skipped, {} failed",
        report.passed(),
        report.skipped(),
        report.failed()
    );
    report
}

const NO_FRONTEND: &str = "Frontend isn't available";

/// Runs `op` once per frontend the service reports, in a fresh session
/// each time.
fn for_each_frontend(
    env: &TunerEnvironment,
    mut op: impl FnMut(&mut TunerSession, FrontendId) -> CheckResult<()>,
) -> CheckResult<Verdict> {
    let ids = env.session().frontend_ids()?;
    if ids.is_empty() {
        return Ok(Verdict::Skipped(NO_FRONTEND));
    }
    for id in ids {
        let mut session = env.session();
        op(&mut session, id)?;
    }
    Ok(Verdict::Passed)
}

fn create_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| session.create_frontend(id))
}

fn tune_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| session.tune_frontend(id))
}

fn stop_tune_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| session.stop_tune_frontend(id))
}

fn close_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| session.close_frontend(id))
}

fn send_diseqc_message(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| {
        let reply = session.send_diseqc_message(id, DISEQC_RESET)?;
        info!("frontend {id} answered DiSEqC reset with {} bytes", reply.len());
        Ok(())
    })
}

fn scan_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 0 });
    for_each_frontend(env, |session, id| {
        let messages = session.scan_frontend(id, &settings)?;
        match messages.last() {
            Some(FrontendScanMessage::End(_)) => Ok(()),
            _ => Err(Failure::Setup(format!(
                "frontend {id}: scan messages did not finish with an end message"
            ))),
        }
    })
}

fn create_demux_with_frontend(env: &TunerEnvironment) -> CheckResult<Verdict> {
    for_each_frontend(env, |session, id| session.create_demux_with_frontend(id).map(drop))
}

fn create_demux(env: &TunerEnvironment) -> CheckResult<Verdict> {
    env.session().create_demux()?;
    Ok(Verdict::Passed)
}

fn close_demux(env: &TunerEnvironment) -> CheckResult<Verdict> {
    env.session().close_demux()?;
    Ok(Verdict::Passed)
}

fn create_descrambler(env: &TunerEnvironment) -> CheckResult<Verdict> {
    env.session().create_descrambler()?;
    Ok(Verdict::Passed)
}

fn close_descrambler(env: &TunerEnvironment) -> CheckResult<Verdict> {
    env.session().close_descrambler()?;
    Ok(Verdict::Passed)
}

fn read_section_filter_output(env: &TunerEnvironment) -> CheckResult<Verdict> {
    run_stream_fixture(env, "section.ts", StreamFixture::single_section())
}

fn playback_multi_filter(env: &TunerEnvironment) -> CheckResult<Verdict> {
    run_stream_fixture(env, "multi.ts", StreamFixture::multi_filter())
}

fn playback_from_fixture(env: &TunerEnvironment) -> CheckResult<Verdict> {
    let Some(fixture) = env.config().playback.as_ref() else {
        return Ok(Verdict::Skipped("no playback fixture configured"));
    };
    let mut filters = Vec::with_capacity(fixture.filters.len());
    let mut goldens = Vec::with_capacity(fixture.filters.len());
    for filter in &fixture.filters {
        filters.push(FilterConf {
            settings: filter.settings,
        });
        goldens.push(fs::read(&filter.golden_file)?);
    }
    let input = InputConf {
        input_file: fixture.input_file.clone(),
        settings: env.config().input,
    };
    check_playback(env, &filters, &input, goldens)
}

fn run_stream_fixture(
    env: &TunerEnvironment,
    name: &str,
    fixture: StreamFixture,
) -> CheckResult<Verdict> {
    let file = ScratchFile::write(&env.config().data_dir(), name, &fixture.stream)?;
    let input = InputConf {
        input_file: file.path().to_path_buf(),
        settings: env.config().input,
    };
    check_playback(env, &fixture.filters, &input, fixture.goldens)
}

fn check_playback(
    env: &TunerEnvironment,
    filters: &[FilterConf],
    input: &InputConf,
    goldens: Vec<Vec<u8>>,
) -> CheckResult<Verdict> {
    let report = env
        .session()
        .playback_data_flow_test(filters, input, goldens)?;
    for outcome in &report.filters {
        info!(
            "filter {} matched after {} events",
            outcome.filter_id, outcome.events_observed
        );
    }
    Ok(Verdict::Passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn case_names_are_unique() {
        let names: HashSet<_> = CASES.iter().map(|case| case.name).collect();
        assert_eq!(names.len(), CASES.len());
    }

    #[test]
    fn report_counts_outcomes() {
        let report = SuiteReport {
            results: vec![
                CaseResult {
                    name: "a",
                    outcome: CaseOutcome::Passed,
                    elapsed: Duration::ZERO,
                },
                CaseResult {
                    name: "b",
                    outcome: CaseOutcome::Skipped(NO_FRONTEND),
                    elapsed: Duration::ZERO,
                },
                CaseResult {
                    name: "c",
                    outcome: CaseOutcome::Failed(Failure::Timeout("frontend event")),
                    elapsed: Duration::ZERO,
                },
            ],
        };
        assert_eq!((report.passed(), report.skipped(), report.failed()), (1, 1, 1));
        assert!(!report.is_success());
    }
}
