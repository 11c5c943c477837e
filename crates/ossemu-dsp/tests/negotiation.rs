use std::time::Duration;

use ossemu_dsp::format::{AFMT_MU_LAW, AFMT_S16_BE, AFMT_S16_LE, AFMT_U8};
use ossemu_dsp::geometry::pow2_ceil;
use ossemu_dsp::{AccessMode, DeviceClass, DeviceNode, Session, SessionConfig};
use pcm_engine::sim::{SimConfig, SimOpener};
use pcm_engine::{Direction, Frames, HwCapabilities};
use proptest::prelude::*;

fn open(opener: &SimOpener, mode: AccessMode, config: SessionConfig) -> Session {
    Session::open(opener, DeviceNode::new(0, DeviceClass::Dsp), mode, false, config).unwrap()
}

fn assert_geometry(session: &Session) -> Result<(), TestCaseError> {
    for direction in Direction::ALL {
        let Some(stream) = session.stream(direction) else {
            continue;
        };
        let hw = stream.hw_config().unwrap();
        let engine = stream.position().engine;
        let legacy = stream.legacy();
        prop_assert!(legacy.buffer_size.is_power_of_two());
        prop_assert!(legacy.period_size.is_power_of_two());
        prop_assert!(legacy.buffer_size >= hw.buffer_size);
        prop_assert!(legacy.period_size >= hw.period_size.min(legacy.buffer_size));
        prop_assert_eq!(legacy.period_count, legacy.buffer_size / legacy.period_size);
        prop_assert_eq!(legacy.boundary % legacy.buffer_size, 0);
        prop_assert_eq!(engine.boundary % hw.buffer_size, 0);
        prop_assert!(hw.period_size <= hw.buffer_size);
    }
    Ok(())
}

fn format_strategy() -> impl Strategy<Value = i32> {
    prop::sample::select(vec![AFMT_U8, AFMT_S16_LE, AFMT_S16_BE, AFMT_MU_LAW])
}

proptest! {
    #[test]
    fn negotiated_geometry_is_legacy_shaped(
        rate in prop::sample::select(vec![8_000, 11_025, 22_050, 44_100, 48_000, 96_000]),
        afmt in format_strategy(),
        channels in 1i32..=2,
        fragment in prop::option::of((4i32..=15, 2i32..=64)),
        granularity in prop::sample::select(vec![1u64, 48]),
    ) {
        let caps = HwCapabilities { granularity, ..HwCapabilities::default() };
        let opener = SimOpener::new(SimConfig::default().with_capabilities(caps));
        let mut session = open(&opener, AccessMode::ReadWrite, SessionConfig::default());

        prop_assert_eq!(session.set_format(afmt).unwrap(), afmt);
        prop_assert_eq!(session.set_channels(channels).unwrap(), channels);
        if let Some((shift, maxfrags)) = fragment {
            session.set_fragment((maxfrags << 16) | shift).unwrap();
        }
        let first = session.set_rate(rate).unwrap();
        prop_assert_eq!(first, rate);
        assert_geometry(&session)?;

        let before = session.stream(Direction::Playback).unwrap().hw_config();
        prop_assert_eq!(session.set_rate(rate).unwrap(), first);
        prop_assert_eq!(session.stream(Direction::Playback).unwrap().hw_config(), before);
    }

    #[test]
    fn fragment_requests_round_trip_as_block_size(
        shift in 4i32..=14,
        afmt in prop::sample::select(vec![AFMT_U8, AFMT_S16_LE]),
        channels in 1i32..=2,
    ) {
        let opener = SimOpener::default();
        let mut session = open(&opener, AccessMode::WriteOnly, SessionConfig::default());
        session.set_format(afmt).unwrap();
        session.set_channels(channels).unwrap();
        session.set_fragment(0x7fff_0000 | shift).unwrap();

        let block = session.block_size().unwrap() as u64;
        let frame_bytes = session.stream(Direction::Playback).unwrap().frame_bytes() as u64;
        prop_assert_eq!(block % frame_bytes, 0);
        prop_assert!((block / frame_bytes).is_power_of_two());
        prop_assert!(block >= 1u64 << shift);
    }
}

#[derive(Clone, Debug)]
enum Step {
    Write(Frames),
    Advance(Frames),
    Query,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u64..6_000).prop_map(Step::Write),
        (1u64..20_000).prop_map(Step::Advance),
        Just(Step::Query),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn byte_counter_tracks_hardware_modulo_its_boundary(
        steps in prop::collection::vec(step_strategy(), 1..64),
    ) {
        // Three 16 KiB rings of U8 mono.
        let config = SessionConfig::default()
            .with_boundary_ceiling(3 * 16_384 + 100)
            .with_resume_backoff(Duration::ZERO);
        let opener = SimOpener::default();
        let mut session = open(&opener, AccessMode::WriteOnly, config);
        let control = opener.control(Direction::Playback).unwrap();
        let boundary = session.stream(Direction::Playback).unwrap().legacy().boundary;
        prop_assert_eq!(boundary, 3 * 16_384);

        let mut last = 0u64;
        for step in steps {
            match step {
                Step::Write(frames) => {
                    let written = session.write(&vec![0x80; frames as usize]).unwrap();
                    prop_assert_eq!(written as u64, frames);
                }
                Step::Advance(frames) => {
                    // Stay short of the application pointer so nothing underruns.
                    let queued = control.appl_pos() - control.hw_pos();
                    control.advance(frames.min(queued.saturating_sub(1)));
                }
                Step::Query => {
                    let info = session.pointer(Direction::Playback).unwrap();
                    let bytes = info.bytes as u64;
                    prop_assert!(bytes < boundary);
                    prop_assert_eq!(bytes, control.hw_pos() % boundary);
                    prop_assert_eq!(info.ptr as u64, bytes % 16_384);
                    if bytes < last {
                        prop_assert!(control.hw_pos() >= boundary);
                    }
                    last = bytes;
                }
            }
        }
    }
}

#[test]
fn legacy_sizes_round_up_engine_sizes() {
    let caps = HwCapabilities {
        granularity: 147,
        ..HwCapabilities::default()
    };
    let opener = SimOpener::new(SimConfig::default().with_capabilities(caps));
    let session = open(&opener, AccessMode::WriteOnly, SessionConfig::default());
    let stream = session.stream(Direction::Playback).unwrap();
    let hw = stream.hw_config().unwrap();
    assert_eq!(hw.period_size % 147, 0);
    assert_eq!(stream.legacy().buffer_size, pow2_ceil(hw.buffer_size));
    assert_eq!(stream.legacy().period_size, pow2_ceil(hw.period_size));
}
