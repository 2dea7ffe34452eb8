//! Underwriting decision engine.
//!
//! Extracted field candidates are reconciled into resolved fields, fed through
//! the income, debt service and collateral calculators, evaluated against a
//! versioned rule set and rolled up into a risk tier and recommended decision.
//! Every completed run is captured as an immutable audit snapshot.

pub mod aggregation;
pub mod audit;
pub mod calculations;
pub mod config;
pub mod decision;
pub mod domain;
pub mod engine;
pub mod repository;
pub mod router;
pub mod rules;
pub mod service;

#[cfg(test)]
mod tests;

pub use aggregation::{
    FieldAggregator, FieldOverride, FieldResolution, FieldSet, OverrideLog, ResolvedField,
};
pub use audit::{calculation_digest, AuditSnapshot};
pub use calculations::{
    CalculationKind, CalculationResult, CalculationStatus, Calculations, IncomeSource,
    IncomeSummary, IncomeType, Liability, PayFrequency, RatioValue, UnusableInput,
};
pub use config::{
    AggregationConfig, CollateralConfig, DebtServiceConfig, EngineConfig, EngineConfigError,
    IncomeConfig,
};
pub use decision::{Decision, DecisionOutcome, RiskAssessment, RiskSignal, RiskTier};
pub use domain::{
    CaseBundle, CaseId, CaseType, DocumentExtraction, DocumentId, EvidenceRef,
    ExtractionOutcome, FieldCandidate, FieldValue, SourceLocator,
};
pub use engine::{CaseAssessment, UnderwritingEngine};
pub use repository::{FileSnapshotStore, SnapshotStore, SnapshotStoreError};
pub use router::underwriting_router;
pub use rules::{
    Comparison, Criterion, FindingStatus, InputRef, PolicyFinding, PolicyRule, Predicate,
    RuleCatalog, RuleCategory, RuleSet, RuleSetError, RuleSetFormat, RuleSetId, RuleSetRegistry,
    Severity,
};
pub use service::{SnapshotSummary, UnderwritingService, UnderwritingServiceError};
