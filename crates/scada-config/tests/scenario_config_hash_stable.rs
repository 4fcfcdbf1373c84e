//! Config hash stability.
//!
//! GREEN when:
//! - the same input hashes identically across calls
//! - key order inside a YAML document does not change the hash
//! - a changed value changes the hash
//! - overlays win over the base layer

use scada_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
source:
  politeness_delay_ms: 500
  retry:
    max_attempts: 1
orchestrator:
  skip_min_buckets: 40
  max_in_flight: 1
"#;

const BASE_YAML_REORDERED: &str = r#"
orchestrator:
  max_in_flight: 1
  skip_min_buckets: 40
source:
  retry:
    max_attempts: 1
  politeness_delay_ms: 500
"#;

const OVERLAY_YAML: &str = r#"
orchestrator:
  max_in_flight: 4
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
}

#[test]
fn overlay_changes_hash_and_wins() {
    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let layered = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(base.config_hash, layered.config_hash);

    let settings = layered.settings().unwrap();
    assert_eq!(settings.orchestrator.max_in_flight, 4);
    // Untouched keys survive the merge.
    assert_eq!(settings.orchestrator.skip_min_buckets, 40);
    assert_eq!(settings.source.politeness_delay_ms, 500);
}

#[test]
fn hash_is_hex_sha256() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
