//! Tests for deduplication key generation.

use super::*;
use std::collections::HashSet;

#[test]
fn test_same_business_key_yields_same_dedup_key() {
    let generator = DedupKeyGenerator::new();

    let first = generator.generate(Some("order-42"));
    let second = generator.generate(Some("order-42"));

    assert_eq!(first, second);
}

#[test]
fn test_business_key_derivation_is_stable_across_generators() {
    let a = DedupKeyGenerator::new().generate(Some("order-42"));
    let b = DedupKeyGenerator::new().generate(Some("order-42"));

    assert_eq!(a, b);
}

#[test]
fn test_different_business_keys_yield_different_dedup_keys() {
    let generator = DedupKeyGenerator::new();

    assert_ne!(
        generator.generate(Some("order-42")),
        generator.generate(Some("order-43"))
    );
}

#[test]
fn test_absent_business_key_yields_distinct_keys() {
    let generator = DedupKeyGenerator::new();

    let keys: HashSet<_> = (0..100).map(|_| generator.generate(None)).collect();

    assert_eq!(keys.len(), 100);
}

#[test]
fn test_namespace_scopes_derived_keys() {
    let billing = DedupKeyGenerator::with_namespace("billing");
    let shipping = DedupKeyGenerator::with_namespace("shipping");

    assert_ne!(
        billing.generate(Some("order-42")),
        shipping.generate(Some("order-42"))
    );
}

#[test]
fn test_namespace_boundary_is_unambiguous() {
    let a = DedupKeyGenerator::with_namespace("ab").generate(Some("c"));
    let b = DedupKeyGenerator::with_namespace("a").generate(Some("bc"));

    assert_ne!(a, b);
}

#[test]
fn test_keys_fit_sqs_deduplication_id_limits() {
    let generator = DedupKeyGenerator::new();
    let long_key = "ключ-".repeat(100);

    for key in [
        generator.generate(Some(&long_key)),
        generator.generate(Some("")),
        generator.generate(None),
    ] {
        assert!(!key.as_str().is_empty());
        assert!(key.as_str().len() <= 128);
        assert!(key.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
