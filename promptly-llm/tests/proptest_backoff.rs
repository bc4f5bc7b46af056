//! Property tests for backoff timing and text recovery.

use std::time::Duration;

use promptly_core::config::RetrySettings;
use promptly_llm::extract::{parse_json, recover_text};
use promptly_llm::retry::backoff_delay;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

proptest! {
    #[test]
    fn delay_never_exceeds_the_cap(
        attempt in 0u32..64,
        base in 0u64..5_000,
        spread in 0u64..60_000,
        seed in any::<u64>(),
    ) {
        let max = base + spread;
        let settings = RetrySettings::new(8, base, max, max).expect("ordered bounds");
        let mut rng = StdRng::seed_from_u64(seed);

        let delay = backoff_delay(attempt, &settings, &mut rng);

        prop_assert!(delay <= Duration::from_millis(max));
    }

    #[test]
    fn delay_is_exponential_plus_bounded_jitter(
        attempt in 0u32..10,
        base in 1u64..1_000,
        seed in any::<u64>(),
    ) {
        let settings = RetrySettings::new(10, base, u64::MAX / 4, u64::MAX / 4).expect("ordered bounds");
        let mut rng = StdRng::seed_from_u64(seed);
        let exponential = base << attempt;

        let delay = backoff_delay(attempt, &settings, &mut rng).as_millis();

        prop_assert!(delay >= u128::from(exponential));
        prop_assert!(delay <= u128::from(exponential + exponential * 3 / 10));
    }

    #[test]
    fn fenced_objects_always_parse(key in "[a-z]{1,12}", value in any::<i64>(), tag in "(json|JSON|)") {
        let raw = format!("```{tag}\n{{\"{key}\": {value}}}\n```");
        let parsed = parse_json(&raw).expect("fenced JSON parses");
        prop_assert_eq!(parsed[key.as_str()].as_i64(), Some(value));
    }

    #[test]
    fn recovery_only_ever_shrinks_text(text in "[ -~\n]{0,200}") {
        let once = recover_text(&text);
        prop_assert!(once.len() <= text.len());
        prop_assert!(text.contains(once));
    }
}
