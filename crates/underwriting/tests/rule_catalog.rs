use std::fs;
use std::path::Path;

use underwriting::workflows::underwriting::{
    CaseType, EngineConfig, EngineConfigError, RuleCatalog, RuleSetError, RuleSetId,
    UnderwritingEngine,
};

const LENIENT_RULES: &str = r#"
[rule_set]
name = "lenient"
version = "1"

[[rules]]
id = "collateral.ltv"
category = "collateral"
name = "Loan to value"

[[rules.criteria]]
id = "within_limit"
status = "pass"
severity = "info"
when = { type = "compare", input = "calc:ltv", op = "<=", value = 95 }

[[rules.criteria]]
id = "over_limit"
status = "fail"
severity = "critical"
remedial_action = "Reduce the loan amount"
when = { type = "always" }
"#;

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("write fixture");
}

#[test]
fn directory_catalog_loads_toml_and_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "lenient.toml", LENIENT_RULES);
    write(
        dir.path(),
        "docs.json",
        r#"{
            "rule_set": { "name": "docs", "version": "2" },
            "rules": [{
                "id": "credit.score",
                "category": "credit",
                "name": "Credit score",
                "criteria": [{
                    "id": "present",
                    "status": "pass",
                    "severity": "info",
                    "when": { "type": "compare", "input": "field:credit.score", "op": ">", "value": 0 }
                }]
            }]
        }"#,
    );
    write(dir.path(), "README.md", "ignored");

    let catalog = RuleCatalog::load_dir(dir.path()).expect("catalog loads");
    let ids: Vec<String> = catalog.ids().map(ToString::to_string).collect();
    assert_eq!(ids, vec!["docs@2", "lenient@1"]);
}

#[test]
fn one_invalid_file_fails_the_whole_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "lenient.toml", LENIENT_RULES);
    write(
        dir.path(),
        "broken.toml",
        &LENIENT_RULES
            .replace("name = \"lenient\"", "name = \"broken\"")
            .replace("op = \"<=\"", "op = \"=<\""),
    );

    let error = RuleCatalog::load_dir(dir.path()).expect_err("broken file rejected");
    assert!(matches!(error, RuleSetError::Toml { .. }), "{error}");
}

#[test]
fn empty_directory_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let error = RuleCatalog::load_dir(dir.path()).expect_err("nothing to load");
    assert!(matches!(error, RuleSetError::Empty(_)));
}

#[test]
fn engine_config_file_selects_rule_sets() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "lenient.toml", LENIENT_RULES);
    let config_dir = tempfile::tempdir().expect("tempdir");
    write(
        config_dir.path(),
        "engine.toml",
        r#"
        [rule_sets]
        conventional_purchase = "lenient@1"
        insured_purchase = "lenient@1"
        refinance = "lenient@1"
        "#,
    );

    let mut catalog = RuleCatalog::builtin().expect("built-in rule sets");
    catalog
        .merge(RuleCatalog::load_dir(dir.path()).expect("directory loads"))
        .expect("no duplicate ids");
    assert_eq!(catalog.len(), 3);

    let config = EngineConfig::load(config_dir.path().join("engine.toml")).expect("config loads");
    let engine = UnderwritingEngine::new(config, &catalog).expect("engine builds");
    assert_eq!(
        engine.rule_set_for(CaseType::Refinance).id(),
        &RuleSetId::new("lenient", "1")
    );
}

#[test]
fn engine_refuses_unknown_rule_set() {
    let config = EngineConfig::from_toml_str(
        r#"
        [rule_sets]
        conventional_purchase = "residential-standard@2026.1"
        insured_purchase = "residential-insured@1999.1"
        refinance = "residential-standard@2026.1"
        "#,
    )
    .expect("config parses");
    let catalog = RuleCatalog::builtin().expect("built-in rule sets");

    let error = UnderwritingEngine::new(config, &catalog).expect_err("unknown rule set");
    assert!(matches!(error, EngineConfigError::UnknownRuleSet { .. }), "{error}");
}

#[test]
fn merging_a_builtin_id_twice_is_rejected() {
    let mut catalog = RuleCatalog::builtin().expect("built-in rule sets");
    let error = catalog
        .merge(RuleCatalog::builtin().expect("built-in rule sets"))
        .expect_err("duplicate ids");
    assert!(matches!(error, RuleSetError::Duplicate(_)));
}
