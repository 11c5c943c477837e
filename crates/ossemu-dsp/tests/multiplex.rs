use ossemu_dsp::{
    AccessMode, DeviceClass, DeviceNode, FdSets, Session, SessionConfig, WaitEvents,
    PCM_ENABLE_OUTPUT,
};
use pcm_engine::sim::{SimControl, SimOpener};
use pcm_engine::{Direction, PcmState, PollFd};

fn open(opener: &SimOpener, mode: AccessMode) -> Session {
    Session::open(
        opener,
        DeviceNode::new(0, DeviceClass::Dsp),
        mode,
        false,
        SessionConfig::default(),
    )
    .unwrap()
}

/// Fill in `revents` the way a real `poll` over the simulated streams would.
fn simulate_poll(fds: &mut [PollFd], controls: &[SimControl]) {
    for pfd in fds.iter_mut() {
        if let Some(control) = controls.iter().find(|control| control.fd() == pfd.fd) {
            pfd.revents = control.poll_ready();
        }
    }
}

#[test]
fn duplex_poll_reports_writable_playback() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::ReadWrite);
    assert_eq!(session.poll_fds(), 2);

    let mut fds = session.poll_prepare(AccessMode::ReadWrite).unwrap();
    assert_eq!(fds.len(), 2);
    simulate_poll(&mut fds, &opener.opened());
    assert_eq!(session.poll_result(&fds).unwrap(), WaitEvents::WRITE);
}

#[test]
fn poll_result_only_looks_at_the_prepared_mode() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::ReadWrite);
    let playback = opener.control(Direction::Playback).unwrap();
    let capture = opener.control(Direction::Capture).unwrap();

    let fds = session.poll_prepare(AccessMode::ReadOnly).unwrap();
    assert_eq!(fds.len(), 1);
    assert_eq!(fds[0].fd, capture.fd());

    let mut all = vec![
        PollFd::new(playback.fd(), pcm_engine::PollEvents::OUT),
        PollFd::new(capture.fd(), pcm_engine::PollEvents::IN),
    ];
    simulate_poll(&mut all, &[playback, capture]);
    assert_eq!(session.poll_result(&all).unwrap(), WaitEvents::empty());
}

#[test]
fn underrun_reports_an_error_event() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::WriteOnly);
    let control = opener.control(Direction::Playback).unwrap();
    session.write(&[0x80; 2048]).unwrap();
    control.advance(5_000);
    assert_eq!(control.state(), PcmState::Xrun);

    let mut fds = session.poll_prepare(AccessMode::WriteOnly).unwrap();
    simulate_poll(&mut fds, &[control]);
    assert!(session.poll_result(&fds).unwrap().contains(WaitEvents::ERROR));
}

#[test]
fn mapped_playback_wakes_at_the_next_period() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::WriteOnly);
    session.mmap(16_384, libc::PROT_WRITE).unwrap();
    session.set_trigger(PCM_ENABLE_OUTPUT).unwrap();
    session.pointer(Direction::Playback).unwrap();
    let control = opener.control(Direction::Playback).unwrap();

    session.poll_prepare(AccessMode::WriteOnly).unwrap();
    assert_eq!(control.sw_params().avail_min, 1024 - 800);
}

#[test]
fn select_sets_round_trip() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::ReadWrite);
    let playback = opener.control(Direction::Playback).unwrap().fd();
    let capture = opener.control(Direction::Capture).unwrap().fd();

    let mut sets = FdSets::default();
    let highest = session
        .select_prepare(AccessMode::ReadWrite, &mut sets, true)
        .unwrap();
    assert_eq!(highest, playback.max(capture));
    assert!(sets.read.contains(&capture));
    assert!(sets.write.contains(&playback));
    assert_eq!(sets.except.len(), 2);

    let ready = FdSets {
        write: [playback].into(),
        ..FdSets::default()
    };
    assert_eq!(session.select_result(&ready).unwrap(), WaitEvents::WRITE);

    let failed = FdSets {
        read: [capture].into(),
        except: [capture].into(),
        ..FdSets::default()
    };
    assert_eq!(
        session.select_result(&failed).unwrap(),
        WaitEvents::READ | WaitEvents::ERROR
    );
}

#[test]
fn select_without_error_watch_leaves_except_empty() {
    let opener = SimOpener::default();
    let mut session = open(&opener, AccessMode::WriteOnly);
    let mut sets = FdSets::default();
    let highest = session
        .select_prepare(AccessMode::WriteOnly, &mut sets, false)
        .unwrap();
    assert_eq!(highest, opener.control(Direction::Playback).unwrap().fd());
    assert!(sets.except.is_empty());
    assert!(sets.read.is_empty());
}
