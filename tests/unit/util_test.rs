//! Tests for utility functions

use crawl_admission::util::{init_tracing, now_ms, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Top < Priority::Mid);
    assert!(Priority::Mid < Priority::Free);
    assert_eq!(Priority::LOWEST, Priority::Free);
    assert_eq!(Priority::default(), Priority::Free);
}

#[test]
fn test_priority_levels() {
    let levels: Vec<u8> = Priority::ALL.iter().map(|p| p.level()).collect();
    assert_eq!(levels, vec![1, 2, 3]);
    assert_eq!(Priority::try_from(2).unwrap(), Priority::Mid);
    assert!(Priority::try_from(0).is_err());
    assert_eq!(Priority::Top.to_string(), "1");
}

#[test]
fn test_clock_advances() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() > before);
}

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing();
    init_tracing();
}
