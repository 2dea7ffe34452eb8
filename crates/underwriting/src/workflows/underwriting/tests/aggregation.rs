use rust_decimal_macros::dec;

use super::common::*;
use crate::workflows::underwriting::aggregation::{
    FieldAggregator, FieldOverride, FieldResolution, OverrideLog,
};
use crate::workflows::underwriting::config::AggregationConfig;
use crate::workflows::underwriting::domain::{EvidenceRef, FieldCandidate, FieldValue};

fn aggregator() -> FieldAggregator {
    FieldAggregator::new(AggregationConfig::default())
}

#[test]
fn single_candidate_wins_trivially() {
    let fields = aggregator().resolve(&[numeric("loan.amount", dec!(520000))]);
    let loan = fields.get("loan.amount").expect("resolved");

    assert_eq!(loan.value, FieldValue::Numeric(dec!(520000)));
    assert_eq!(loan.resolution, FieldResolution::SingleCandidate);
    assert!(!loan.conflicted);
}

#[test]
fn twelve_percent_disagreement_is_flagged_and_keeps_both_candidates() {
    let candidates = [
        candidate(
            "income.b1.salary.amount",
            FieldValue::Numeric(dec!(132000)),
            0.81,
            "doc-employment-letter",
            1,
        ),
        candidate(
            "income.b1.salary.amount",
            FieldValue::Numeric(dec!(150000)),
            0.93,
            "doc-paystub",
            2,
        ),
    ];
    let fields = aggregator().resolve(&candidates);
    let salary = fields.get("income.b1.salary.amount").expect("resolved");

    assert!(salary.conflicted);
    assert_eq!(salary.max_variance, Some(dec!(0.12)));
    assert_eq!(salary.value, FieldValue::Numeric(dec!(150000)));
    assert_eq!(salary.resolution, FieldResolution::HighestConfidence);
    assert_eq!(salary.candidates.len(), 2);
    assert_eq!(fields.unresolved_conflicts().count(), 1);
}

#[test]
fn agreeing_candidates_pick_highest_confidence() {
    let candidates = [
        candidate("loan.amount", FieldValue::Numeric(dec!(519000)), 0.7, "doc-a", 1),
        candidate("loan.amount", FieldValue::Numeric(dec!(520000)), 0.9, "doc-b", 1),
    ];
    let fields = aggregator().resolve(&candidates);
    let loan = fields.get("loan.amount").expect("resolved");

    assert!(!loan.conflicted);
    assert_eq!(loan.resolution, FieldResolution::Consensus);
    assert_eq!(loan.value, FieldValue::Numeric(dec!(520000)));
}

#[test]
fn equal_confidence_prefers_most_recent_candidate() {
    let mut older = candidate("loan.amount", FieldValue::Numeric(dec!(519500)), 0.9, "doc-a", 1);
    older.produced_at = produced_at(1);
    let mut newer = candidate("loan.amount", FieldValue::Numeric(dec!(520000)), 0.9, "doc-b", 1);
    newer.produced_at = produced_at(5);

    let forward = aggregator().resolve(&[older.clone(), newer.clone()]);
    let reversed = aggregator().resolve(&[newer, older]);

    assert_eq!(
        forward.get("loan.amount").map(|field| &field.value),
        Some(&FieldValue::Numeric(dec!(520000)))
    );
    assert_eq!(forward, reversed);
}

#[test]
fn per_field_tolerance_overrides_default() {
    let mut config = AggregationConfig::default();
    config
        .field_tolerances
        .insert("income.b1.salary.amount".to_string(), dec!(0.15));
    let candidates = [
        candidate("income.b1.salary.amount", FieldValue::Numeric(dec!(132000)), 0.81, "doc-a", 1),
        candidate("income.b1.salary.amount", FieldValue::Numeric(dec!(150000)), 0.93, "doc-b", 1),
    ];

    let fields = FieldAggregator::new(config).resolve(&candidates);
    assert!(!fields.get("income.b1.salary.amount").expect("resolved").conflicted);
}

#[test]
fn text_candidates_compare_after_normalization() {
    let candidates = [
        candidate("property.type", FieldValue::Text("Single Family".into()), 0.8, "doc-a", 1),
        candidate("property.type", FieldValue::Text(" single  family".into()), 0.9, "doc-b", 1),
        candidate("property.tenure", FieldValue::Text("freehold".into()), 0.8, "doc-a", 1),
        candidate("property.tenure", FieldValue::Text("leasehold".into()), 0.9, "doc-b", 1),
    ];
    let fields = aggregator().resolve(&candidates);

    assert!(!fields.get("property.type").expect("resolved").conflicted);
    assert!(fields.get("property.tenure").expect("resolved").conflicted);
}

#[test]
fn out_of_range_confidence_is_clamped() {
    let candidates = [
        candidate("credit.score", FieldValue::Numeric(dec!(700)), f64::NAN, "doc-a", 1),
        candidate("credit.score", FieldValue::Numeric(dec!(701)), 1.7, "doc-b", 1),
    ];
    let fields = aggregator().resolve(&candidates);
    let score = fields.get("credit.score").expect("resolved");

    assert_eq!(score.confidence, 1.0);
    assert_eq!(score.value, FieldValue::Numeric(dec!(701)));
    assert_eq!(score.candidates[1].confidence, 0.0);
}

#[test]
fn empty_input_resolves_nothing() {
    let fields = aggregator().resolve(std::iter::empty::<&FieldCandidate>());
    assert!(fields.is_empty());
}

#[test]
fn override_explains_conflict_without_dropping_candidates() {
    let candidates = [
        candidate("income.b1.salary.amount", FieldValue::Numeric(dec!(132000)), 0.81, "doc-a", 1),
        candidate("income.b1.salary.amount", FieldValue::Numeric(dec!(150000)), 0.93, "doc-b", 2),
    ];
    let fields = aggregator().resolve(&candidates);

    let mut log = OverrideLog::default();
    log.record(FieldOverride {
        field: "income.b1.salary.amount".to_string(),
        value: FieldValue::Numeric(dec!(140000)),
        reason: "first correction".to_string(),
        actor: "uw-avery".to_string(),
        recorded_at: produced_at(10),
    });
    log.record(FieldOverride {
        field: "income.b1.salary.amount".to_string(),
        value: FieldValue::Numeric(dec!(132000)),
        reason: "employment letter confirmed by phone".to_string(),
        actor: "uw-jordan".to_string(),
        recorded_at: produced_at(20),
    });

    let overridden = log.apply(&fields);
    let salary = overridden.get("income.b1.salary.amount").expect("resolved");

    assert_eq!(salary.value, FieldValue::Numeric(dec!(132000)));
    assert!(salary.conflicted);
    assert!(!salary.unresolved_conflict());
    assert_eq!(salary.candidates.len(), 2);
    assert_eq!(log.events().len(), 2);
    assert!(salary.evidence().contains(&EvidenceRef::ManualOverride {
        field_path: "income.b1.salary.amount".to_string(),
        actor: "uw-jordan".to_string(),
    }));

    // The aggregated set is untouched.
    assert!(fields
        .get("income.b1.salary.amount")
        .expect("resolved")
        .unresolved_conflict());
}

#[test]
fn override_can_supply_a_missing_field() {
    let fields = aggregator().resolve(&[numeric("loan.amount", dec!(520000))]);
    let log = OverrideLog::new([FieldOverride {
        field: "credit.score".to_string(),
        value: FieldValue::Numeric(dec!(705)),
        reason: "bureau pull attached manually".to_string(),
        actor: "uw-avery".to_string(),
        recorded_at: produced_at(3),
    }]);

    let overridden = log.apply(&fields);
    assert_eq!(overridden.len(), 2);
    assert_eq!(overridden.numeric("credit.score"), Some(dec!(705)));
    assert!(overridden
        .get("credit.score")
        .expect("override present")
        .candidates
        .is_empty());
}
