// tests/config_durations.rs

use cas_guard::config::parse_duration_secs;

#[test]
fn parses_all_units() {
    assert_eq!(parse_duration_secs("45s"), Some(45));
    assert_eq!(parse_duration_secs("15m"), Some(900));
    assert_eq!(parse_duration_secs("2h"), Some(7_200));
    assert_eq!(parse_duration_secs("7d"), Some(604_800));
}

#[test]
fn tolerates_case_and_whitespace() {
    assert_eq!(parse_duration_secs(" 30M "), Some(1_800));
    assert_eq!(parse_duration_secs("1H"), Some(3_600));
}

#[test]
fn rejects_garbage() {
    assert_eq!(parse_duration_secs(""), None);
    assert_eq!(parse_duration_secs("15"), None);
    assert_eq!(parse_duration_secs("m15"), None);
    assert_eq!(parse_duration_secs("15w"), None);
    assert_eq!(parse_duration_secs("-5m"), None);
}
