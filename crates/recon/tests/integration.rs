use std::path::PathBuf;

use nuclink_recon::averaging::{AveragedField, AveragingComment, CommentCategory};
use nuclink_recon::config::GroupingConfig;
use nuclink_recon::engine::{load_input_json, run, run_with_averager};
use nuclink_recon::group::GroupState;
use nuclink_recon::model::{EntityKind, GroupingResult};
use nuclink_recon::{AveragingEngine, AveragingOutcome, AveragingRequest};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_config(name: &str) -> GroupingConfig {
    let path = fixtures_dir().join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    GroupingConfig::from_toml(&text).unwrap()
}

fn load_input(name: &str) -> nuclink_core::ObservationInput {
    let path = fixtures_dir().join(name);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    load_input_json(&text).unwrap()
}

fn load_and_run(input: &str, config: &str) -> GroupingResult {
    run(&load_config(config), &load_input(input)).unwrap()
}

fn tags(result: &GroupingResult, group: usize) -> Vec<String> {
    result.groups[group]
        .members
        .iter()
        .map(|m| m.tag.clone())
        .collect()
}

/// Arithmetic mean over whatever values arrive.
struct PlainMean;

impl AveragingEngine for PlainMean {
    fn average(&self, request: &AveragingRequest) -> Option<AveragingOutcome> {
        if request.values.len() < 2 {
            return None;
        }
        let n = request.values.len() as f64;
        let mean = request.values.iter().map(|v| v.value).sum::<f64>() / n;
        Some(AveragingOutcome {
            value: mean,
            upper: 0.0,
            lower: 0.0,
            chi_squared: None,
            comments: vec![AveragingComment {
                category: CommentCategory::Unweighted,
                text: format!("mean of {} values", request.values.len()),
            }],
        })
    }
}

// -------------------------------------------------------------------------
// Level grouping
// -------------------------------------------------------------------------

#[test]
fn close_levels_merge_into_one_group() {
    let result = load_and_run("three-way-merge.json", "grouping.toml");

    assert_eq!(result.meta.config_name, "Default Grouping");
    assert_eq!(result.meta.nuclide.as_deref(), Some("100MO"));
    assert_eq!(result.summary.level_groups, 1);
    assert_eq!(result.summary.members, 3);
    assert_eq!(result.summary.multiply_assigned, 0);
    assert_eq!(result.summary.uncertain, 0);
    assert_eq!(tags(&result, 0), vec!["A", "B", "C"]);
    assert!(result.groups[0].members.iter().all(|m| m.firm));
    assert_eq!(result.groups[0].state, GroupState::Finalized);
}

#[test]
fn distant_levels_stay_apart_even_in_a_wide_window() {
    let result = load_and_run("separated.json", "wide-window.toml");

    assert_eq!(result.summary.level_groups, 2);
    assert_eq!(result.summary.singletons, 2);
    assert!((result.groups[0].anchor_value - 500.0).abs() < 1e-9);
    assert!((result.groups[1].anchor_value - 520.0).abs() < 1e-9);
}

#[test]
fn firm_spin_parity_contradiction_blocks_matching() {
    let result = load_and_run("spin-parity-conflict.json", "grouping.toml");

    assert_eq!(result.summary.level_groups, 2);
    assert_eq!(tags(&result, 0), vec!["A"]);
    assert_eq!(tags(&result, 1), vec!["B"]);
}

#[test]
fn gamma_consistent_group_beats_a_closer_energy() {
    let result = load_and_run("cascade.json", "grouping.toml");

    assert_eq!(result.summary.level_groups, 2);
    let cascade = &result.groups[0];
    assert!((cascade.anchor_value - 1000.0).abs() < 0.5);
    assert_eq!(tags(&result, 0), vec!["A", "B"]);
    assert_eq!(tags(&result, 1), vec!["A"]);

    assert_eq!(cascade.gammas.len(), 2);
    for gamma in &cascade.gammas {
        assert_eq!(gamma.members.len(), 2);
        assert_eq!(gamma.state, GroupState::Finalized);
    }
    assert_eq!(result.summary.gamma_groups, 2);
}

#[test]
fn all_marked_group_is_pruned_and_rebuilt() {
    let result = load_and_run("questionable.json", "grouping.toml");

    assert!(result.summary.pruned_groups >= 1);
    assert_eq!(result.summary.level_groups, 2);
    assert_eq!(tags(&result, 0), vec!["A?", "B?", "C?"]);
    assert_eq!(tags(&result, 1), vec!["D"]);
    assert_eq!(result.summary.uncertain, 3);
}

#[test]
fn released_member_joins_the_surviving_firm_neighbour() {
    // A? and B? group first; C sits outside A's window and stays alone.
    // Once the all-marked group is pruned, B? is nearer C than A.
    let result = load_and_run("released-member.json", "grouping.toml");

    assert_eq!(result.summary.pruned_groups, 1);
    assert_eq!(result.summary.level_groups, 2);
    assert_eq!(tags(&result, 0), vec!["A?"]);
    assert_eq!(tags(&result, 1), vec!["B?", "C"]);
    assert_eq!(result.summary.uncertain, 2);
    assert_eq!(result.summary.multiply_assigned, 0);

    let joined = &result.groups[1];
    assert_eq!(joined.anchor_value, 102.5);
    assert!(!joined.members[0].firm);
    assert!(joined.members[1].firm);
}

#[test]
fn reference_dataset_anchors_and_leads() {
    let result = load_and_run("reference.json", "grouping.toml");

    assert_eq!(result.summary.level_groups, 2);
    assert_eq!(result.summary.with_reference, 2);
    assert_eq!(result.meta.datasets.iter().filter(|d| d.reference).count(), 1);

    let excited = &result.groups[1];
    assert_eq!(excited.reference.as_deref(), Some("ADOPTED LEVELS, GAMMAS"));
    assert!((excited.anchor_value - 1332.514).abs() < 1e-9);
    assert_eq!(excited.members[0].dataset, "ADOPTED LEVELS, GAMMAS");
    assert_eq!(excited.adopted_spin_parity.as_deref(), Some("2+"));

    assert_eq!(excited.gammas.len(), 1);
    assert_eq!(excited.gammas[0].members.len(), 2);
}

#[test]
fn empty_dataset_changes_nothing() {
    let config = load_config("grouping.toml");
    let input = load_input("three-way-merge.json");
    let before = run(&config, &input).unwrap();

    let mut padded = input.clone();
    padded
        .datasets
        .push(nuclink_core::DatasetRecord::new("EMPTY", "E", vec![]));
    let after = run(&config, &padded).unwrap();

    assert_eq!(
        serde_json::to_value(&before.groups).unwrap(),
        serde_json::to_value(&after.groups).unwrap()
    );
    assert_eq!(after.meta.datasets.len(), 4);
}

#[test]
fn repeated_runs_are_identical() {
    let config = load_config("grouping.toml");
    let input = load_input("cascade.json");
    let first = run(&config, &input).unwrap();
    let second = run(&config, &input).unwrap();
    assert_eq!(
        serde_json::to_value(&first.groups).unwrap(),
        serde_json::to_value(&second.groups).unwrap()
    );
    assert_eq!(first.summary, second.summary);
}

// -------------------------------------------------------------------------
// Errors and unplaced observations
// -------------------------------------------------------------------------

#[test]
fn duplicate_dataset_ids_are_rejected() {
    let mut input = load_input("separated.json");
    input.datasets[1].id = input.datasets[0].id.clone();
    let err = run(&GroupingConfig::default(), &input).unwrap_err();
    assert!(matches!(err, nuclink_recon::ReconError::DuplicateDataset(_)));
}

#[test]
fn unparseable_energy_is_reported_as_unplaced() {
    let mut input = load_input("three-way-merge.json");
    input.datasets[2].levels[0].energy = "1OO.1".into();
    let result = run(&GroupingConfig::default(), &input).unwrap();

    assert_eq!(result.summary.members, 2);
    assert_eq!(result.unplaced.len(), 1);
    assert_eq!(result.unplaced[0].dataset, "COULOMB EXCITATION");
    assert_eq!(result.unplaced[0].kind, EntityKind::Level);
}

// -------------------------------------------------------------------------
// Averaging and output
// -------------------------------------------------------------------------

#[test]
fn averages_are_attached_per_field() {
    let config = load_config("grouping.toml");
    let input = load_input("reference.json");
    let result = run_with_averager(&config, &input, Some(&PlainMean)).unwrap();

    let excited = &result.groups[1];
    let fields: Vec<AveragedField> = excited.averages.iter().map(|a| a.field).collect();
    assert_eq!(fields, vec![AveragedField::Energy, AveragedField::HalfLife]);

    let gamma = &excited.gammas[0];
    let fields: Vec<AveragedField> = gamma.averages.iter().map(|a| a.field).collect();
    assert_eq!(fields, vec![AveragedField::Energy, AveragedField::Intensity]);
    assert!((gamma.averages[1].outcome.value - 99.99).abs() < 1e-9);
}

#[test]
fn result_serializes_to_json() {
    let result = load_and_run("cascade.json", "grouping.toml");
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["meta"]["nuclide"], "152SM");
    assert_eq!(json["summary"]["level_groups"], 2);
    assert_eq!(json["groups"][0]["state"], "finalized");
    assert_eq!(json["groups"][0]["members"][1]["tag"], "B");
    assert!(json["groups"][1].get("gammas").is_none());
    assert!(json["unplaced"].as_array().unwrap().is_empty());
}
