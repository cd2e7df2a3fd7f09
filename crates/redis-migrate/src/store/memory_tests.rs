//! Tests for the in-memory store and glob matching.

use super::*;
use proptest::prelude::*;

fn matches(pattern: &str, text: &str) -> bool {
    glob_match(pattern.as_bytes(), text.as_bytes())
}

#[test]
fn test_glob_star() {
    assert!(matches("*", ""));
    assert!(matches("*", "anything:at:all"));
    assert!(matches("user:*", "user:1"));
    assert!(matches("user:*", "user:"));
    assert!(!matches("user:*", "users:1"));
    assert!(matches("*:session", "abc:session"));
    assert!(matches("a*b*c", "a-x-b-y-c"));
    assert!(!matches("a*b*c", "a-x-b-y"));
}

#[test]
fn test_glob_question_mark() {
    assert!(matches("h?llo", "hello"));
    assert!(matches("h?llo", "hallo"));
    assert!(!matches("h?llo", "hllo"));
}

#[test]
fn test_glob_classes() {
    assert!(matches("h[ae]llo", "hello"));
    assert!(matches("h[ae]llo", "hallo"));
    assert!(!matches("h[ae]llo", "hillo"));
    assert!(matches("h[^e]llo", "hallo"));
    assert!(!matches("h[^e]llo", "hello"));
    assert!(matches("h[a-b]llo", "hbllo"));
    assert!(!matches("h[a-b]llo", "hcllo"));
}

#[test]
fn test_glob_escapes() {
    assert!(matches(r"user\*", "user*"));
    assert!(!matches(r"user\*", "user1"));
    assert!(matches(r"what\?", "what?"));
    assert!(!matches(r"what\?", "whatx"));
}

#[tokio::test]
async fn test_scan_pages_cover_keyspace() {
    let store = MemoryStore::new();
    for i in 0..25 {
        store.insert_string(&format!("k:{i}"), "v");
    }

    let mut cursor = 0;
    let mut seen = Vec::new();
    loop {
        let (next, keys) = store.scan(cursor, "*", 10).await.unwrap();
        assert!(keys.len() <= 10);
        seen.extend(keys);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 25);
}

#[tokio::test]
async fn test_scan_survives_deletes_behind_cursor() {
    let store = MemoryStore::new();
    for i in 0..6 {
        store.insert_string(&format!("k:{i}"), "v");
    }

    let (cursor, first) = store.scan(0, "*", 3).await.unwrap();
    for key in &first {
        store.delete(key).await.unwrap();
    }
    let (next, second) = store.scan(cursor, "*", 3).await.unwrap();
    assert_eq!(next, 0);
    assert_eq!(second, vec!["k:3", "k:4", "k:5"]);
}

#[tokio::test]
async fn test_scan_filters_by_pattern() {
    let store = MemoryStore::new();
    store.insert_string("user:1", "a");
    store.insert_string("order:1", "b");
    store.insert_string("user:2", "c");

    let (next, keys) = store.scan(0, "user:*", 100).await.unwrap();
    assert_eq!(next, 0);
    assert_eq!(keys, vec!["user:1", "user:2"]);
}

#[tokio::test]
async fn test_key_info_and_ttl() {
    let store = MemoryStore::new();
    store.insert_hash("h", [("a", "1")]);
    store.set_ttl("h", 60);

    assert_eq!(store.key_info("h").await.unwrap(), ("hash".to_string(), 60));
    assert_eq!(
        store.key_info("missing").await.unwrap(),
        ("none".to_string(), -2)
    );
}

#[tokio::test]
async fn test_zset_add_and_range() {
    let store = MemoryStore::new();
    let added = store
        .zset_add("z", &[(5.0, b"x".to_vec()), (1.0, b"y".to_vec())])
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert_eq!(
        store.zset_range_with_scores("z").await.unwrap(),
        vec![(b"y".to_vec(), 1.0), (b"x".to_vec(), 5.0)]
    );
}

#[tokio::test]
async fn test_hash_set_if_absent() {
    let store = MemoryStore::new();
    store.insert_hash("h", [("a", "9")]);
    assert!(!store.hash_set_if_absent("h", b"a", b"1").await.unwrap());
    assert!(store.hash_set_if_absent("h", b"b", b"2").await.unwrap());
    assert_eq!(
        store.value("h"),
        Some(KeyValue::Hash(vec![
            (b"a".to_vec(), b"9".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ]))
    );
}

#[tokio::test]
async fn test_hash_delete_last_field_removes_key() {
    let store = MemoryStore::new();
    store.insert_hash("h", [("a", "1")]);
    assert_eq!(store.hash_delete_fields("h", &[b"a".to_vec()]).await.unwrap(), 1);
    assert!(!store.contains("h"));
}

#[tokio::test]
async fn test_wrong_type_write_fails() {
    let store = MemoryStore::new();
    store.insert_string("s", "v");
    let err = store.list_push("s", &[b"x".to_vec()]).await.unwrap_err();
    assert!(err.to_string().contains("WRONGTYPE"));
}

#[tokio::test]
async fn test_expire_sets_ttl() {
    let store = MemoryStore::new();
    store.insert_string("s", "v");
    assert!(store.expire("s", 120).await.unwrap());
    assert_eq!(store.ttl("s"), 120);
    assert!(!store.expire("missing", 120).await.unwrap());
}

#[tokio::test]
async fn test_set_clears_ttl() {
    let store = MemoryStore::new();
    store.insert_string("s", "v");
    store.set_ttl("s", 30);
    store.set("s", b"w").await.unwrap();
    assert_eq!(store.ttl("s"), -1);
}

#[tokio::test]
async fn test_injected_failure_and_log() {
    let store = MemoryStore::new();
    store.insert_string("a", "1");
    store.fail_on("GET", "a");

    assert!(matches!(store.get("a").await, Err(Error::Read { .. })));
    assert!(store.saw("GET", "a"));
    assert_eq!(store.commands(), vec!["GET a".to_string()]);
}

#[tokio::test]
async fn test_closed_store_rejects_commands() {
    let mut store = MemoryStore::new();
    let observer = store.clone();
    store.close().await.unwrap();
    assert!(observer.is_closed());
    assert!(matches!(
        observer.exists("a").await,
        Err(Error::Connection(_))
    ));
}

proptest! {
    #[test]
    fn prop_star_matches_everything(text in ".*") {
        prop_assert!(matches("*", &text));
    }

    #[test]
    fn prop_literal_matches_itself(text in "[a-z0-9:_-]{0,24}") {
        prop_assert!(matches(&text, &text));
    }

    #[test]
    fn prop_escaped_pattern_matches_literally(text in "[a-z*?\\[\\]]{0,16}") {
        let mut escaped = String::new();
        for c in text.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        prop_assert!(matches(&escaped, &text));
    }

    #[test]
    fn prop_prefix_star(prefix in "[a-z]{1,8}", rest in "[a-z0-9:]{0,12}") {
        let pattern = format!("{prefix}*");
        let key = format!("{prefix}{rest}");
        prop_assert!(matches(&pattern, &key));
    }
}
