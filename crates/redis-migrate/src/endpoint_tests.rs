//! Tests for endpoint parsing and equality.

use super::*;
use proptest::prelude::*;

#[test]
fn test_parse_host_only() {
    let ep: StoreEndpoint = "10.1.1.4".parse().unwrap();
    assert_eq!(ep.host, "10.1.1.4");
    assert_eq!(ep.port, 6379);
    assert_eq!(ep.db, 0);
    assert!(ep.auth.is_none());
    assert!(ep.tls.is_none());
}

#[test]
fn test_parse_full_address() {
    let ep: StoreEndpoint = "myauth@10.1.1.14:6380/3".parse().unwrap();
    assert_eq!(ep.auth.as_deref(), Some("myauth"));
    assert_eq!(ep.host, "10.1.1.14");
    assert_eq!(ep.port, 6380);
    assert_eq!(ep.db, 3);
}

#[test]
fn test_parse_auth_split_at_last_at() {
    let ep: StoreEndpoint = "p@ss@word@localhost/1".parse().unwrap();
    assert_eq!(ep.auth.as_deref(), Some("p@ss@word"));
    assert_eq!(ep.host, "localhost");
    assert_eq!(ep.db, 1);
}

#[test]
fn test_parse_non_numeric_port_falls_back() {
    let ep: StoreEndpoint = "localhost:abc".parse().unwrap();
    assert_eq!(ep.port, DEFAULT_PORT);
}

#[test]
fn test_parse_port_out_of_range() {
    assert!("localhost:70000".parse::<StoreEndpoint>().is_err());
}

#[test]
fn test_parse_non_numeric_db_is_rejected() {
    let err = "localhost:6379/main".parse::<StoreEndpoint>().unwrap_err();
    assert!(matches!(err, Error::InvalidAddress { .. }));
}

#[test]
fn test_parse_empty_host_defaults() {
    let ep: StoreEndpoint = ":6390/2".parse().unwrap();
    assert_eq!(ep.host, DEFAULT_HOST);
    assert_eq!(ep.port, 6390);
}

#[test]
fn test_parse_rediss_scheme_enables_tls() {
    let ep: StoreEndpoint = "rediss://secret@cache.example.com:6380/0".parse().unwrap();
    assert_eq!(ep.tls, Some(TlsOptions { insecure: false }));
    assert_eq!(ep.auth.as_deref(), Some("secret"));
}

#[test]
fn test_equality_ignores_auth_and_tls() {
    let a: StoreEndpoint = "one@localhost:6379/0".parse().unwrap();
    let b: StoreEndpoint = "rediss://two@localhost:6379/0".parse().unwrap();
    let c: StoreEndpoint = "localhost:6379/1".parse().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_display_hides_credential() {
    let ep: StoreEndpoint = "hunter2@localhost/4".parse().unwrap();
    assert_eq!(ep.to_string(), "localhost:6379 (DB: 4)");
    assert!(!format!("{ep:?}").contains("hunter2"));
}

#[test]
fn test_connection_url() {
    let ep = StoreEndpoint::new("localhost", 6380, 2).with_auth("s3cr:t");
    assert_eq!(ep.connection_url().unwrap(), "redis://:s3cr%3At@localhost:6380/2");

    let tls = StoreEndpoint::new("cache", 6379, 0).with_tls(TlsOptions { insecure: true });
    assert_eq!(tls.connection_url().unwrap(), "rediss://cache:6379/0#insecure");
}

#[test]
fn test_with_empty_auth_is_none() {
    let ep = StoreEndpoint::new("localhost", 6379, 0).with_auth("");
    assert!(ep.auth.is_none());
}

#[test]
fn test_yaml_address_and_struct_forms() {
    let from_str: StoreEndpoint = serde_yaml::from_str("\"auth@redis-a:6381/5\"").unwrap();
    assert_eq!(from_str.port, 6381);
    assert_eq!(from_str.db, 5);

    let structured: StoreEndpoint =
        serde_yaml::from_str("host: redis-b\ndb: 2\ntls:\n  insecure: true\n").unwrap();
    assert_eq!(structured.host, "redis-b");
    assert_eq!(structured.port, DEFAULT_PORT);
    assert_eq!(structured.db, 2);
    assert_eq!(structured.tls, Some(TlsOptions { insecure: true }));
}

proptest! {
    #[test]
    fn prop_well_formed_addresses_round_trip(
        auth in "[a-z0-9]{0,12}",
        host in "[a-z][a-z0-9.-]{0,20}",
        port in 1u16..,
        db in 0i64..64,
    ) {
        let address = if auth.is_empty() {
            format!("{host}:{port}/{db}")
        } else {
            format!("{auth}@{host}:{port}/{db}")
        };
        let ep: StoreEndpoint = address.parse().unwrap();
        prop_assert_eq!(&ep.host, &host);
        prop_assert_eq!(ep.port, port);
        prop_assert_eq!(ep.db, db);
        prop_assert_eq!(ep.auth.unwrap_or_default(), auth);
    }
}
