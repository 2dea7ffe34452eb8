use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::super::config::{EngineConfig, EngineConfigError};
use super::super::domain::CaseType;
use super::{FindingStatus, InputRef, PolicyRule, Predicate, RuleSet, RuleSetId};

const BUILTIN_RULE_SETS: [(&str, &str); 2] = [
    (
        "residential-standard.toml",
        include_str!("../../../../rules/residential-standard.toml"),
    ),
    (
        "residential-insured.toml",
        include_str!("../../../../rules/residential-insured.toml"),
    ),
];

/// Serialization format of a rule-set resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSetFormat {
    Toml,
    Json,
}

impl RuleSetFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Malformed rule configuration. Fatal at load time.
#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("failed to read rule set {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("rule set {resource} is not valid TOML: {source}")]
    Toml {
        resource: String,
        source: toml::de::Error,
    },
    #[error("rule set {resource} is not valid JSON: {source}")]
    Json {
        resource: String,
        source: serde_json::Error,
    },
    #[error("rule set {resource} is invalid: {reason}")]
    Invalid { resource: String, reason: String },
    #[error("rule set {0} is defined more than once")]
    Duplicate(RuleSetId),
    #[error("no rule sets found in {0:?}")]
    Empty(PathBuf),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSetDocument {
    rule_set: RuleSetHeader,
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSetHeader {
    name: String,
    version: String,
    #[serde(default)]
    description: String,
}

impl RuleSet {
    /// Parse and validate one resource; `resource` only labels errors.
    pub fn parse(resource: &str, raw: &str, format: RuleSetFormat) -> Result<Self, RuleSetError> {
        let document: RuleSetDocument = match format {
            RuleSetFormat::Toml => toml::from_str(raw).map_err(|source| RuleSetError::Toml {
                resource: resource.to_string(),
                source,
            })?,
            RuleSetFormat::Json => {
                serde_json::from_str(raw).map_err(|source| RuleSetError::Json {
                    resource: resource.to_string(),
                    source,
                })?
            }
        };

        validate_document(&document).map_err(|reason| RuleSetError::Invalid {
            resource: resource.to_string(),
            reason,
        })?;

        Ok(RuleSet {
            id: RuleSetId::new(document.rule_set.name.trim(), document.rule_set.version.trim()),
            description: document.rule_set.description,
            rules: document.rules,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let path = path.as_ref();
        let format = RuleSetFormat::from_path(path).ok_or_else(|| RuleSetError::Invalid {
            resource: path.display().to_string(),
            reason: "expected a .toml or .json extension".to_string(),
        })?;
        let raw = std::fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &raw, format)
    }
}

fn validate_document(document: &RuleSetDocument) -> Result<(), String> {
    let header = &document.rule_set;
    if header.name.trim().is_empty() || header.version.trim().is_empty() {
        return Err("rule_set.name and rule_set.version are required".to_string());
    }
    if header.name.contains('@') {
        return Err("rule_set.name must not contain '@'".to_string());
    }
    if document.rules.is_empty() {
        return Err("rule set declares no rules".to_string());
    }

    let mut rule_ids = BTreeSet::new();
    for rule in &document.rules {
        if rule.id.trim().is_empty() {
            return Err("rule id must not be empty".to_string());
        }
        if rule.id.starts_with("system.") {
            return Err(format!("rule id {} uses the reserved 'system.' prefix", rule.id));
        }
        if !rule_ids.insert(rule.id.as_str()) {
            return Err(format!("duplicate rule id {}", rule.id));
        }
        validate_rule(rule).map_err(|reason| format!("rule {}: {reason}", rule.id))?;
    }

    Ok(())
}

fn validate_rule(rule: &PolicyRule) -> Result<(), String> {
    if rule.criteria.is_empty() {
        return Err("declares no criteria".to_string());
    }
    if rule.inputs().is_empty() {
        return Err("no criterion references an input".to_string());
    }

    let mut criterion_ids = BTreeSet::new();
    let last = rule.criteria.len() - 1;
    for (index, criterion) in rule.criteria.iter().enumerate() {
        if criterion.id.trim().is_empty() {
            return Err("criterion id must not be empty".to_string());
        }
        if !criterion_ids.insert(criterion.id.as_str()) {
            return Err(format!("duplicate criterion id {}", criterion.id));
        }

        let needs_remedy = criterion.status != FindingStatus::Pass
            && criterion.status != FindingStatus::NotApplicable;
        let has_remedy = criterion
            .remedial_action
            .as_deref()
            .is_some_and(|action| !action.trim().is_empty());
        if needs_remedy && !has_remedy {
            return Err(format!(
                "criterion {} has status {} but no remedial_action",
                criterion.id,
                criterion.status.label()
            ));
        }

        match &criterion.when {
            Predicate::Always if index == 0 => {
                return Err(format!(
                    "criterion {} uses 'always' as the first criterion",
                    criterion.id
                ))
            }
            Predicate::Always if index != last => {
                return Err(format!(
                    "criterion {} uses 'always' but is followed by more criteria",
                    criterion.id
                ))
            }
            Predicate::Between { min, max, .. } if min > max => {
                return Err(format!(
                    "criterion {} has min {} greater than max {}",
                    criterion.id, min, max
                ))
            }
            Predicate::OneOf { values, .. } if values.is_empty() => {
                return Err(format!("criterion {} has an empty one_of list", criterion.id))
            }
            Predicate::OneOf {
                input: InputRef::Calculation { kind, .. },
                ..
            } => {
                return Err(format!(
                    "criterion {} applies one_of to calculation {kind}",
                    criterion.id
                ))
            }
            _ => {}
        }
    }

    Ok(())
}

/// Immutable set of rule sets keyed by `name@version`.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    sets: BTreeMap<RuleSetId, Arc<RuleSet>>,
}

impl RuleCatalog {
    /// Rule sets compiled into the crate.
    pub fn builtin() -> Result<Self, RuleSetError> {
        let mut catalog = Self::default();
        for (resource, raw) in BUILTIN_RULE_SETS {
            catalog.insert(RuleSet::parse(resource, raw, RuleSetFormat::Toml)?)?;
        }
        Ok(catalog)
    }

    /// Every `.toml`/`.json` file in `dir`, in file-name order.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, RuleSetError> {
        let dir = dir.as_ref();
        let io_error = |source| RuleSetError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && RuleSetFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut catalog = Self::default();
        for path in paths {
            let rule_set = RuleSet::load(&path)?;
            debug!(path = %path.display(), rule_set = %rule_set.id(), "loaded rule set");
            catalog.insert(rule_set)?;
        }

        if catalog.is_empty() {
            return Err(RuleSetError::Empty(dir.to_path_buf()));
        }
        info!(dir = %dir.display(), rule_sets = catalog.len(), "rule catalog loaded");
        Ok(catalog)
    }

    pub fn insert(&mut self, rule_set: RuleSet) -> Result<(), RuleSetError> {
        let id = rule_set.id().clone();
        if self.sets.contains_key(&id) {
            return Err(RuleSetError::Duplicate(id));
        }
        self.sets.insert(id, Arc::new(rule_set));
        Ok(())
    }

    /// Add every rule set from `other`; an id present in both is an error.
    pub fn merge(&mut self, other: RuleCatalog) -> Result<(), RuleSetError> {
        for (id, rule_set) in other.sets {
            if self.sets.contains_key(&id) {
                return Err(RuleSetError::Duplicate(id));
            }
            self.sets.insert(id, rule_set);
        }
        Ok(())
    }

    pub fn get(&self, id: &RuleSetId) -> Option<Arc<RuleSet>> {
        self.sets.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &RuleSetId> {
        self.sets.keys()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Case type to rule set, resolved once per case at evaluation start.
#[derive(Debug, Clone)]
pub struct RuleSetRegistry {
    conventional_purchase: Arc<RuleSet>,
    insured_purchase: Arc<RuleSet>,
    refinance: Arc<RuleSet>,
}

impl RuleSetRegistry {
    /// Every configured route must name a rule set present in the catalog.
    pub fn new(config: &EngineConfig, catalog: &RuleCatalog) -> Result<Self, EngineConfigError> {
        let route = |case_type: CaseType| {
            let id = config.rule_sets.get(&case_type).ok_or_else(|| {
                EngineConfigError::Invalid(format!(
                    "rule_sets has no entry for case type {}",
                    case_type.label()
                ))
            })?;
            catalog
                .get(id)
                .ok_or_else(|| EngineConfigError::UnknownRuleSet {
                    case_type: case_type.label(),
                    rule_set: id.clone(),
                })
        };

        Ok(Self {
            conventional_purchase: route(CaseType::ConventionalPurchase)?,
            insured_purchase: route(CaseType::InsuredPurchase)?,
            refinance: route(CaseType::Refinance)?,
        })
    }

    pub fn resolve(&self, case_type: CaseType) -> &Arc<RuleSet> {
        match case_type {
            CaseType::ConventionalPurchase => &self.conventional_purchase,
            CaseType::InsuredPurchase => &self.insured_purchase,
            CaseType::Refinance => &self.refinance,
        }
    }
}
