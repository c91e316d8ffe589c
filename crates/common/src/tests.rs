use super::*;
use crate::value::{value_cmp, value_total_cmp};
use proptest::prelude::*;
use serde_json::json;
use std::cmp::Ordering;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.port, 4250);
    assert!(config.wal.enabled);
}

#[test]
fn builder_overrides_defaults() {
    let config = Config::builder().port(9999).worker_count(2).build();
    assert_eq!(config.port, 9999);
    assert_eq!(config.worker_count, 2);
    assert!(config.validate().is_ok());
}

#[test]
fn zero_workers_is_rejected() {
    let config = Config::builder().worker_count(0).build();
    assert!(config.validate().is_err());
}

#[test]
fn unknown_log_level_is_rejected() {
    let config = Config::builder().log_level("loud".into()).build();
    assert!(config.validate().is_err());
}

#[test]
fn config_round_trips_through_json() {
    let config = Config::builder().port(4321).build();
    let text = serde_json::to_string(&config).unwrap();
    let back: Config = serde_json::from_str(&text).unwrap();
    assert_eq!(back.port, 4321);
    assert_eq!(back.wal.checkpoint_interval, config.wal.checkpoint_interval);
}

#[test]
fn partial_config_fills_defaults() {
    let back: Config = serde_json::from_str(r#"{"port": 5555}"#).unwrap();
    assert_eq!(back.port, 5555);
    assert_eq!(back.host, "127.0.0.1");
    assert!(back.auth.is_empty());
}

#[test]
fn page_zero_terminates_chains() {
    assert!(PageId(0).is_terminator());
    assert!(!PageId(1).is_terminator());
}

proptest! {
    // Order antisymmetry over numbers
    #[test]
    fn number_order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
        let a = json!(i);
        let b = json!(j);
        match (value_cmp(&a, &b), value_cmp(&b, &a)) {
            (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
            _ => prop_assert!(false, "numbers must always compare"),
        }
    }

    // Total ordering never falls over regardless of kind mix
    #[test]
    fn total_cmp_is_reflexive(s in ".*") {
        let v = json!(s);
        prop_assert_eq!(value_total_cmp(&v, &v), Ordering::Equal);
    }
}
