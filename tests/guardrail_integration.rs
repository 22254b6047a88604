//! Integration tests for guarding regenerated plans on disk

use std::fs;

use botintern::guardrail::guard_regenerated_plan;
use botintern::plan::TestPlan;

const ORIGINAL: &str = "meta:\n  baseUrl: http://localhost:4000\nscenarios:\n  - name: Home\n    path: /\n    tests:\n      - see: Welcome\n";

#[test]
fn test_regenerated_plan_without_meta_keeps_base_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vibe.yaml");
    fs::write(&path, ORIGINAL).unwrap();

    let updated = "scenarios:\n  - name: Home\n    path: /\n    tests:\n      - see: Welcome\n      - click: Start\n";
    let outcome = guard_regenerated_plan(&path, ORIGINAL, updated, Some("add a click on Start")).unwrap();

    assert!(!outcome.structure.has_required_sections);
    assert!(outcome.content.starts_with("meta:\n  baseUrl: http://localhost:4000\n"));
    let plan = TestPlan::from_yaml(&outcome.content).unwrap();
    assert_eq!(plan.base_url(), "http://localhost:4000");
    assert_eq!(plan.scenarios[0].tests.len(), 2);

    let backup = outcome.backup.expect("original plan is backed up");
    assert_eq!(fs::read_to_string(backup).unwrap(), ORIGINAL);
    // The guard decides; it does not write the plan itself
    assert_eq!(fs::read_to_string(&path).unwrap(), ORIGINAL);
}

#[test]
fn test_first_plan_has_no_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vibe.yaml");

    let outcome = guard_regenerated_plan(&path, "", ORIGINAL, None).unwrap();
    assert!(outcome.backup.is_none());
    assert_eq!(outcome.content, ORIGINAL);
    assert_eq!(outcome.changes.diff.change_percentage, 100.0);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_legacy_keys_are_reported_but_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vibe.yaml");
    fs::write(&path, ORIGINAL).unwrap();

    let updated = "meta:\n  baseUrl: http://localhost:4000\nscenarios:\n  - name: Home\n    path: /\n    tests:\n      - type: assert_visible\n        selector: '#hero'\n";
    let outcome = guard_regenerated_plan(&path, ORIGINAL, updated, None).unwrap();

    assert!(!outcome.structure.is_valid);
    assert_eq!(outcome.structure.invalid_keys, vec!["selector".to_string()]);
    assert_eq!(outcome.content, updated);
    assert!(!outcome.changes.is_valid);
}
