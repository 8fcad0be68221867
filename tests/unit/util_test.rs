//! Tests for utility modules

use std::time::{Duration, Instant};

use prometheus_task_engine::util::{instant_after, now_ms, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::CRITICAL > Priority::HIGH);
    assert!(Priority::HIGH > Priority::NORMAL);
    assert!(Priority::NORMAL > Priority::LOW);
    assert!(Priority::LOW > Priority::BACKGROUND);
    assert_eq!(Priority::default(), Priority::NORMAL);
}

#[test]
fn test_priority_clamped() {
    assert_eq!(Priority::new(200), Priority::CRITICAL);
    assert_eq!(Priority::new(200).value(), Priority::MAX_VALUE);
    assert_eq!(Priority::new(5).value(), 5);
}

#[test]
fn test_priority_serde_transparent() {
    let json = serde_json::to_string(&Priority::HIGH).unwrap();
    assert_eq!(json, "96");
    let parsed: Priority = serde_json::from_str("32").unwrap();
    assert_eq!(parsed, Priority::LOW);
}

#[test]
fn test_now_ms_monotone_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(a > 0);
    assert!(b >= a);
}

#[test]
fn test_instant_after_saturates() {
    let soon = instant_after(Duration::from_millis(5));
    assert!(soon > Instant::now() - Duration::from_millis(1));
    let far = instant_after(Duration::MAX);
    assert!(far > Instant::now() + Duration::from_secs(60));
}

#[test]
fn test_init_tracing_is_idempotent() {
    prometheus_task_engine::util::init_tracing();
    prometheus_task_engine::util::init_tracing();
    assert!(tracing::dispatcher::has_been_set());
}
