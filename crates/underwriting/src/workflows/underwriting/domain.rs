use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregation::FieldOverride;
use super::calculations::IncomeType;

/// Identifier wrapper for an underwriting case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(pub String);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a source document handed to the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Case family used to pick the rule set applied at evaluation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    ConventionalPurchase,
    InsuredPurchase,
    Refinance,
}

impl CaseType {
    pub const fn ordered() -> [Self; 3] {
        [
            Self::ConventionalPurchase,
            Self::InsuredPurchase,
            Self::Refinance,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::ConventionalPurchase => "conventional_purchase",
            Self::InsuredPurchase => "insured_purchase",
            Self::Refinance => "refinance",
        }
    }
}

/// Typed value carried by an extracted or resolved field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Numeric(Decimal),
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_numeric(&self) -> Option<Decimal> {
        match self {
            FieldValue::Numeric(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Numeric(value) => write!(f, "{}", value.normalize()),
            FieldValue::Flag(value) => write!(f, "{value}"),
            FieldValue::Text(value) => write!(f, "\"{value}\""),
        }
    }
}

/// Where in a source document a candidate value was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocator {
    pub document_id: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// One extracted value for a logical field, produced outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub field: String,
    pub value: FieldValue,
    pub confidence: f64,
    pub source: SourceLocator,
    pub produced_at: DateTime<Utc>,
}

impl FieldCandidate {
    pub fn evidence(&self) -> EvidenceRef {
        EvidenceRef::Document {
            document_id: self.source.document_id.clone(),
            field_path: self.field.clone(),
            page: self.source.page,
        }
    }
}

/// Outcome reported by the extraction collaborator for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Completed { candidates: Vec<FieldCandidate> },
    Failed { reason: String },
    TimedOut,
}

/// Per-document extraction result; the case bundle is complete once every
/// expected document has one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentExtraction {
    pub document_id: DocumentId,
    pub outcome: ExtractionOutcome,
}

impl DocumentExtraction {
    pub fn completed(document_id: impl Into<String>, candidates: Vec<FieldCandidate>) -> Self {
        Self {
            document_id: DocumentId(document_id.into()),
            outcome: ExtractionOutcome::Completed { candidates },
        }
    }

    pub fn is_incomplete(&self) -> bool {
        !matches!(self.outcome, ExtractionOutcome::Completed { .. })
    }
}

/// Citation attached to findings and calculations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceRef {
    Document {
        document_id: DocumentId,
        field_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
    },
    ManualOverride {
        field_path: String,
        actor: String,
    },
    Gap {
        field_path: String,
    },
}

impl EvidenceRef {
    pub fn field_path(&self) -> &str {
        match self {
            EvidenceRef::Document { field_path, .. }
            | EvidenceRef::ManualOverride { field_path, .. }
            | EvidenceRef::Gap { field_path } => field_path,
        }
    }
}

/// Fully assembled input for one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBundle {
    pub case_id: CaseId,
    pub case_type: CaseType,
    #[serde(default)]
    pub documents: Vec<DocumentExtraction>,
    #[serde(default)]
    pub overrides: Vec<FieldOverride>,
    #[serde(default)]
    pub income_factor_overrides: BTreeMap<IncomeType, Decimal>,
}

impl CaseBundle {
    pub fn new(case_id: impl Into<String>, case_type: CaseType) -> Self {
        Self {
            case_id: CaseId(case_id.into()),
            case_type,
            documents: Vec::new(),
            overrides: Vec::new(),
            income_factor_overrides: BTreeMap::new(),
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &FieldCandidate> {
        self.documents
            .iter()
            .filter_map(|document| match &document.outcome {
                ExtractionOutcome::Completed { candidates } => Some(candidates.iter()),
                _ => None,
            })
            .flatten()
    }

    pub fn incomplete_documents(&self) -> impl Iterator<Item = &DocumentExtraction> {
        self.documents.iter().filter(|document| document.is_incomplete())
    }
}
