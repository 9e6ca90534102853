use std::sync::Arc;

use tempfile::TempDir;
use tuner_conformance::hal::{
    DemuxFilterSettings, DemuxSectionSettings, FrontendDvbtSettings, FrontendScanMessage,
    FrontendSettings, Status,
};
use tuner_conformance::loopback::{LoopbackConfig, LoopbackTuner};
use tuner_conformance::session::{DemuxState, DescramblerState, FilterState, FrontendState};
use tuner_conformance::{Failure, HarnessConfig, TunerEnvironment};

fn environment(dir: &TempDir) -> TunerEnvironment {
    let service = LoopbackTuner::new(LoopbackConfig {
        frontend_ids: vec![0, 1],
        queue_dir: dir.path().to_path_buf(),
        ..LoopbackConfig::default()
    })
    .expect("loopback tuner");
    let config = HarnessConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..HarnessConfig::default()
    };
    TunerEnvironment::new(Arc::new(service), config)
}

fn section_settings() -> DemuxFilterSettings {
    DemuxFilterSettings::Section(DemuxSectionSettings {
        tpid: 0x100,
        table_id: None,
    })
}

#[test]
fn descrambler_rebind_reports_invalid_state() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    session.create_descrambler().expect("bind then rebind");
    assert_eq!(session.descrambler_state(), DescramblerState::SourceBound);

    session.close_descrambler().expect("close descrambler");
    assert_eq!(session.descrambler_state(), DescramblerState::Closed);
}

#[test]
fn descrambler_rebind_at_the_service() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let (demux_id, _demux) = env.service().open_demux().unwrap();
    let descrambler = env.service().open_descrambler().unwrap();

    assert_eq!(descrambler.set_demux_source(demux_id), Status::Success);
    assert_eq!(descrambler.set_demux_source(demux_id), Status::InvalidState);
}

#[test]
fn closing_demux_invalidates_its_filters() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    let filter_id = session.add_filter_to_demux(&section_settings()).unwrap();
    assert_eq!(session.filter_state(filter_id), Some(FilterState::Configured));
    let (_, stale) = session.demux().expect("open demux");

    session.close_demux().expect("close demux");
    assert_eq!(session.demux_state(), DemuxState::Closed);
    assert_eq!(session.filter_state(filter_id), None);

    assert_eq!(stale.start_filter(filter_id), Status::InvalidState);
    assert_eq!(stale.configure_filter(filter_id, &section_settings()), Status::InvalidState);
    assert!(stale.get_filter_queue_desc(filter_id).is_err());
    assert!(matches!(
        session.start_filter(filter_id),
        Err(Failure::IllegalTransition { .. })
    ));
}

#[test]
fn filter_must_be_started_before_stop() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    let filter_id = session.add_filter_to_demux(&section_settings()).unwrap();
    assert!(matches!(
        session.stop_filter(filter_id),
        Err(Failure::IllegalTransition { op: "stop filter", .. })
    ));
    session.start_filter(filter_id).unwrap();
    assert!(matches!(
        session.start_filter(filter_id),
        Err(Failure::IllegalTransition { op: "start filter", .. })
    ));
    session.stop_filter(filter_id).unwrap();
    assert_eq!(session.filter_state(filter_id), Some(FilterState::Stopped));
    session.start_filter(filter_id).unwrap();
}

#[test]
fn second_demux_in_one_session_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    session.create_demux().unwrap();
    assert!(matches!(
        session.create_demux(),
        Err(Failure::IllegalTransition { op: "open demux", .. })
    ));
}

#[test]
fn frontend_lifecycle_follows_tune_stop_close() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    session.tune_frontend(1).expect("tune with ATSC then DVB-T");
    assert_eq!(session.frontend_state(), FrontendState::Tuned);
    session.stop_tune_frontend(1).unwrap();
    assert_eq!(session.frontend_state(), FrontendState::Stopped);
    session.close_frontend(1).unwrap();
    assert_eq!(session.frontend_state(), FrontendState::Closed);

    let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 0 });
    assert!(matches!(
        session.tune(&settings),
        Err(Failure::IllegalTransition { op: "tune frontend", .. })
    ));
}

#[test]
fn closed_frontend_handle_is_rejected_by_service() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let frontend = env.service().open_frontend_by_id(0).unwrap();
    assert_eq!(frontend.close(), Status::Success);
    let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 0 });
    assert_eq!(frontend.tune(&settings), Status::InvalidState);
}

#[test]
fn demux_bound_to_frontend_source() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    session.create_demux_with_frontend(0).unwrap();
    assert_eq!(session.demux_state(), DemuxState::SourceBound);
    assert_eq!(session.frontend_state(), FrontendState::Opened);

    let (_, demux) = session.demux().unwrap();
    assert_eq!(demux.set_frontend_data_source(42), Status::InvalidArgument);
}

#[test]
fn diseqc_and_scan_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let mut session = env.session();

    let reply = session.send_diseqc_message(0, &[0xE0, 0x10, 0x38]).unwrap();
    assert_eq!(reply, vec![0xE0, 0x10, 0x38]);

    let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 474_000 });
    let messages = session.scan_frontend(0, &settings).unwrap();
    assert_eq!(messages.first(), Some(&FrontendScanMessage::Locked(true)));
    assert_eq!(messages.last(), Some(&FrontendScanMessage::End(true)));
}

#[test]
fn dropping_a_session_releases_its_demux() {
    let dir = tempfile::tempdir().unwrap();
    let env = environment(&dir);
    let demux_id = {
        let mut session = env.session();
        let id = session.create_demux().unwrap();
        session.add_filter_to_demux(&section_settings()).unwrap();
        id
    };

    let descrambler = env.service().open_descrambler().unwrap();
    assert_eq!(descrambler.set_demux_source(demux_id), Status::InvalidArgument);
    let leftover = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "fmq"))
        .count();
    assert_eq!(leftover, 0);
}
