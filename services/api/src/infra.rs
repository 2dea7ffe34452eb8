use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;
use underwriting::config::UnderwritingPaths;
use underwriting::error::AppError;
use underwriting::workflows::underwriting::{
    AuditSnapshot, CaseBundle, CaseId, EngineConfig, RuleCatalog, SnapshotStore,
    SnapshotStoreError, UnderwritingEngine,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) engine: Arc<UnderwritingEngine>,
}

/// Snapshot store used when no snapshot directory is configured. Contents are
/// lost on restart.
#[derive(Default, Clone)]
pub(crate) struct InMemorySnapshotStore {
    snapshots: Arc<Mutex<HashMap<CaseId, Vec<AuditSnapshot>>>>,
}

impl InMemorySnapshotStore {
    fn guard(&self) -> Result<MutexGuard<'_, HashMap<CaseId, Vec<AuditSnapshot>>>, SnapshotStoreError> {
        self.snapshots
            .lock()
            .map_err(|_| SnapshotStoreError::Unavailable("snapshot mutex poisoned".to_string()))
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn append(&self, snapshot: AuditSnapshot) -> Result<(), SnapshotStoreError> {
        let mut guard = self.guard()?;
        let history = guard.entry(snapshot.case_id().clone()).or_default();
        if history
            .iter()
            .any(|stored| stored.snapshot_id() == snapshot.snapshot_id())
        {
            return Err(SnapshotStoreError::Conflict(snapshot.snapshot_id()));
        }
        history.push(snapshot);
        Ok(())
    }

    fn latest(&self, case_id: &CaseId) -> Result<Option<AuditSnapshot>, SnapshotStoreError> {
        Ok(self
            .guard()?
            .get(case_id)
            .and_then(|history| history.last().cloned()))
    }

    fn history(&self, case_id: &CaseId) -> Result<Vec<AuditSnapshot>, SnapshotStoreError> {
        Ok(self.guard()?.get(case_id).cloned().unwrap_or_default())
    }
}

/// Built-in rule sets plus any found in the configured rules directory.
pub(crate) fn load_catalog(paths: &UnderwritingPaths) -> Result<RuleCatalog, AppError> {
    let mut catalog = RuleCatalog::builtin()?;
    if let Some(dir) = &paths.rules_dir {
        catalog.merge(RuleCatalog::load_dir(dir)?)?;
    }
    Ok(catalog)
}

pub(crate) fn load_engine_config(paths: &UnderwritingPaths) -> Result<EngineConfig, AppError> {
    match &paths.engine_config {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

pub(crate) fn build_engine(paths: &UnderwritingPaths) -> Result<UnderwritingEngine, AppError> {
    let catalog = load_catalog(paths)?;
    let config = load_engine_config(paths)?;
    let engine = UnderwritingEngine::new(config, &catalog)?;
    info!(
        rule_sets = catalog.len(),
        custom_rules = paths.rules_dir.is_some(),
        custom_config = paths.engine_config.is_some(),
        "underwriting engine ready"
    );
    Ok(engine)
}

pub(crate) fn read_bundle(path: &Path) -> Result<CaseBundle, AppError> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|err| AppError::Input(format!("{} is not a case bundle: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_build_the_builtin_engine() {
        let engine = build_engine(&UnderwritingPaths::default()).expect("engine builds");
        assert_eq!(engine.config(), &EngineConfig::default());
    }

    #[test]
    fn missing_rules_dir_is_reported() {
        let paths = UnderwritingPaths {
            rules_dir: Some("/nonexistent/underwriting-rules".into()),
            ..UnderwritingPaths::default()
        };
        let error = build_engine(&paths).expect_err("directory missing");
        assert!(matches!(error, AppError::RuleSet(_)));
    }

    #[test]
    fn memory_store_rejects_duplicate_snapshot() {
        let engine = build_engine(&UnderwritingPaths::default()).expect("engine builds");
        let assessment = engine.assess(&CaseBundle::new(
            "case-mem",
            underwriting::workflows::underwriting::CaseType::Refinance,
        ));
        let snapshot = AuditSnapshot::capture(assessment, None).expect("snapshot");

        let store = InMemorySnapshotStore::default();
        store.append(snapshot.clone()).expect("first append");
        assert!(matches!(
            store.append(snapshot),
            Err(SnapshotStoreError::Conflict(_))
        ));
    }
}
