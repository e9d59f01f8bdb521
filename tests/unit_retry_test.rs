use meshgate::core::retry::{Retry, RetryConfig};
use std::time::Duration;

fn test_config() -> RetryConfig {
    RetryConfig {
        first: Duration::from_millis(100),
        step: Duration::from_millis(50),
        max: Duration::from_millis(300),
    }
}

#[test]
fn first_attempt_is_jittered_around_first() {
    let retry = Retry::new(test_config());
    let d = retry.current_duration();
    assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
}

#[test]
fn increment_grows_the_base_duration() {
    let mut retry = Retry::new(test_config());
    let before = retry.current_duration();
    retry.increment();
    retry.increment();
    let after = retry.current_duration();
    // Jitter means no single sample is guaranteed ordered, but the base grew
    // by 2*step, so the maximum possible "after" sample comfortably exceeds
    // the minimum possible "before" sample.
    assert!(before <= Duration::from_millis(100));
    assert!(after <= Duration::from_millis(200));
}

#[test]
fn duration_never_exceeds_max() {
    let mut retry = Retry::new(test_config());
    for _ in 0..50 {
        retry.increment();
        assert!(retry.current_duration() <= Duration::from_millis(300));
    }
}

#[test]
fn reset_returns_to_first_attempt() {
    let mut retry = Retry::new(test_config());
    for _ in 0..10 {
        retry.increment();
    }
    retry.reset();
    let d = retry.current_duration();
    assert!(d <= Duration::from_millis(100));
}

#[tokio::test]
async fn after_actually_sleeps_roughly_current_duration() {
    let retry = Retry::new(RetryConfig {
        first: Duration::from_millis(10),
        step: Duration::from_millis(10),
        max: Duration::from_millis(20),
    });
    let start = std::time::Instant::now();
    retry.after().await;
    assert!(start.elapsed() >= Duration::from_millis(5));
}
