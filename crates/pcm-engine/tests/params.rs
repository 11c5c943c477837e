use pcm_engine::{HwCapabilities, HwParams, Interval};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Refinement {
    Buffer(u64),
    Period(u64),
    PeriodNear(u64),
    PeriodsMin(u64),
    PeriodsMax(u64),
}

fn refinement_strategy() -> impl Strategy<Value = Refinement> {
    prop_oneof![
        (1u64..100_000).prop_map(Refinement::Buffer),
        (1u64..20_000).prop_map(Refinement::Period),
        (1u64..20_000).prop_map(Refinement::PeriodNear),
        (1u64..64).prop_map(Refinement::PeriodsMin),
        (1u64..64).prop_map(Refinement::PeriodsMax),
    ]
}

fn caps_strategy() -> impl Strategy<Value = HwCapabilities> {
    (1u64..64, 2u64..8).prop_map(|(granularity, periods_min)| HwCapabilities {
        granularity,
        periods: Interval::new(periods_min, 256),
        ..HwCapabilities::default()
    })
}

proptest! {
    #[test]
    fn refinements_never_leave_the_space_empty(
        caps in caps_strategy(),
        steps in prop::collection::vec(refinement_strategy(), 1..24),
    ) {
        let mut space = HwParams::any(&caps);
        for step in steps {
            let _ = match step {
                Refinement::Buffer(frames) => space.set_buffer_size(frames),
                Refinement::Period(frames) => space.set_period_size(frames),
                Refinement::PeriodNear(frames) => space.set_period_size_near(frames).map(|_| ()),
                Refinement::PeriodsMin(count) => space.set_periods_min(count),
                Refinement::PeriodsMax(count) => space.set_periods_max(count),
            };
            let config = space.choose();
            prop_assert!(config.is_ok());
            let config = config.unwrap();
            prop_assert_eq!(config.period_size % caps.granularity, 0);
            prop_assert_eq!(config.buffer_size % caps.granularity, 0);
            prop_assert!(space.period_size().contains(config.period_size));
            prop_assert!(space.buffer_size().contains(config.buffer_size));
            prop_assert!(config.buffer_size >= config.period_size * space.periods().min);
            prop_assert!(config.buffer_size <= config.period_size * space.periods().max);
        }
    }
}
