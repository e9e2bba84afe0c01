//! Tests for backoff policy module

use super::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn policy() -> BackoffPolicy {
    BackoffPolicy::new(
        Duration::from_secs(2),
        Duration::from_millis(100),
        Duration::from_secs(10),
    )
}

#[test]
fn test_backoff_policy_default_values() {
    let policy = BackoffPolicy::default();

    assert_eq!(policy.idle_delay, Duration::from_secs(1));
    assert_eq!(policy.base, Duration::from_millis(200));
    assert_eq!(policy.max, Duration::from_secs(30));
    assert!(policy.use_jitter);
    assert_eq!(policy.jitter_percent, 0.5);
}

#[test]
fn test_idle_delay_is_constant() {
    let policy = policy();

    for attempt in [0, 1, 5, 50] {
        assert_eq!(
            policy.next_delay(attempt, BackoffKind::Idle),
            Duration::from_secs(2)
        );
    }
}

#[test]
fn test_idle_delay_is_clamped_to_long_poll_cap() {
    let policy = BackoffPolicy::new(
        Duration::from_secs(120),
        Duration::from_millis(100),
        Duration::from_secs(10),
    );

    assert_eq!(policy.next_delay(0, BackoffKind::Idle), MAX_IDLE_DELAY);
}

#[test]
fn test_transient_delay_without_jitter_doubles_until_cap() {
    let policy = policy().without_jitter();

    assert_eq!(policy.next_delay(0, BackoffKind::Transient), Duration::from_millis(100));
    assert_eq!(policy.next_delay(1, BackoffKind::Transient), Duration::from_millis(200));
    assert_eq!(policy.next_delay(2, BackoffKind::Transient), Duration::from_millis(400));
    assert_eq!(policy.next_delay(6, BackoffKind::Transient), Duration::from_millis(6400));
    assert_eq!(policy.next_delay(7, BackoffKind::Transient), Duration::from_secs(10));
    assert_eq!(policy.next_delay(40, BackoffKind::Transient), Duration::from_secs(10));
}

#[test]
fn test_base_delay_is_non_decreasing() {
    let policy = policy();

    let mut previous = Duration::ZERO;
    for attempt in 0..64 {
        let delay = policy.base_delay(attempt);
        assert!(delay >= previous, "attempt {} decreased", attempt);
        assert!(delay <= policy.max);
        previous = delay;
    }
}

#[test]
fn test_jittered_delay_stays_within_bounds() {
    let policy = policy();
    let mut rng = StdRng::seed_from_u64(7);

    for attempt in 0..40 {
        for _ in 0..50 {
            let delay = policy.next_delay_with_rng(attempt, BackoffKind::Transient, &mut rng);
            assert!(delay <= policy.max, "attempt {}: {:?} above cap", attempt, delay);

            let base = policy.base_delay(attempt).as_secs_f64();
            let secs = delay.as_secs_f64();
            assert!(secs >= base * 0.5 - 1e-9, "attempt {}: {} below band", attempt, secs);
            assert!(secs <= base * 1.5 + 1e-9, "attempt {}: {} above band", attempt, secs);
        }
    }
}

#[test]
fn test_jitter_produces_variation() {
    let policy = policy();
    let mut rng = StdRng::seed_from_u64(42);

    let delays: std::collections::HashSet<_> = (0..10)
        .map(|_| policy.next_delay_with_rng(3, BackoffKind::Transient, &mut rng))
        .collect();

    assert!(delays.len() > 1, "Expected variation in jittered delays");
}

#[test]
fn test_custom_jitter_percent_is_clamped() {
    assert_eq!(policy().with_jitter_percent(3.0).jitter_percent, 1.0);
    assert_eq!(policy().with_jitter_percent(-1.0).jitter_percent, 0.0);
}

#[test]
fn test_non_finite_jitter_percent_disables_jitter() {
    let mut rng = StdRng::seed_from_u64(7);

    for percent in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let policy = policy().with_jitter_percent(percent);
        assert_eq!(policy.jitter_percent, 0.0);
        assert_eq!(
            policy.next_delay_with_rng(2, BackoffKind::Transient, &mut rng),
            Duration::from_millis(400)
        );
    }
}

#[test]
fn test_max_below_base_is_raised() {
    let policy = BackoffPolicy::new(
        Duration::from_secs(1),
        Duration::from_secs(5),
        Duration::from_secs(1),
    );

    assert_eq!(policy.max, Duration::from_secs(5));
    assert_eq!(policy.base_delay(3), Duration::from_secs(5));
}

#[test]
fn test_from_config() {
    let config = BackoffConfig {
        idle_delay_ms: 500,
        base_ms: 50,
        max_ms: 1_000,
        jitter_percent: 0.25,
    };

    let policy = BackoffPolicy::from_config(&config);

    assert_eq!(policy.idle_delay, Duration::from_millis(500));
    assert_eq!(policy.base, Duration::from_millis(50));
    assert_eq!(policy.max, Duration::from_secs(1));
    assert_eq!(policy.jitter_percent, 0.25);
}
