use crate::infra::{build_engine, InMemorySnapshotStore};
use crate::render::print_assessment;
use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Args;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use underwriting::config::UnderwritingPaths;
use underwriting::error::AppError;
use underwriting::workflows::underwriting::{
    CaseBundle, CaseType, DocumentExtraction, DocumentId, ExtractionOutcome, FieldCandidate,
    FieldOverride, FieldValue, SnapshotSummary, SourceLocator, UnderwritingService,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print each snapshot summary as JSON after the text report
    #[arg(long)]
    pub(crate) json: bool,
    /// Skip re-running the first case to show snapshot supersession
    #[arg(long)]
    pub(crate) skip_rerun: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { json, skip_rerun } = args;

    let engine = Arc::new(build_engine(&UnderwritingPaths::default())?);
    let store = Arc::new(InMemorySnapshotStore::default());
    let service = UnderwritingService::new(engine, store);

    println!("Underwriting decision engine demo");
    let cases = demo_cases();
    for (title, bundle) in &cases {
        println!("\n== {title} ==");
        let snapshot = service.evaluate(bundle)?;
        print_assessment(snapshot.assessment());
        println!(
            "- Snapshot {} | digest {}",
            snapshot.snapshot_id(),
            &snapshot.calculation_digest()[..12]
        );
        if json {
            let summary = SnapshotSummary::from(&snapshot);
            match serde_json::to_string_pretty(&summary) {
                Ok(rendered) => println!("{rendered}"),
                Err(err) => println!("  Snapshot summary unavailable: {err}"),
            }
        }
    }

    if skip_rerun {
        return Ok(());
    }

    let Some((title, bundle)) = cases.first() else {
        return Ok(());
    };
    println!("\n== Re-run: {title} ==");
    let rerun = service.evaluate(bundle)?;
    let history = service.history(&bundle.case_id)?;
    println!(
        "- {} snapshot(s) on record; latest supersedes {}",
        history.len(),
        rerun
            .supersedes()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "nothing".to_string())
    );
    let reproduced = history
        .first()
        .is_some_and(|first| first.calculation_digest() == rerun.calculation_digest());
    println!("- Calculations reproduced exactly: {reproduced}");

    Ok(())
}

fn demo_time(offset_minutes: i64) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);
    base + Duration::minutes(offset_minutes)
}

fn observed(field: &str, value: FieldValue, confidence: f64, document: &str, page: u32) -> FieldCandidate {
    FieldCandidate {
        field: field.to_string(),
        value,
        confidence,
        source: SourceLocator {
            document_id: DocumentId(document.to_string()),
            page: Some(page),
            region: None,
        },
        produced_at: demo_time(0),
    }
}

fn amount(field: &str, value: Decimal) -> FieldCandidate {
    observed(field, FieldValue::Numeric(value), 0.95, "application-form", 1)
}

fn application_candidates(credit_score: Decimal) -> Vec<FieldCandidate> {
    vec![
        amount("income.b1.salary.amount", dec!(150000)),
        observed(
            "income.b1.salary.frequency",
            FieldValue::Text("annual".to_string()),
            0.95,
            "application-form",
            1,
        ),
        amount("loan.amount", dec!(520000)),
        amount("loan.contract_rate", dec!(4.79)),
        amount("loan.amortization_months", dec!(300)),
        amount("property.annual_taxes", dec!(4800)),
        amount("property.monthly_heating", dec!(100)),
        observed(
            "property.type",
            FieldValue::Text("Single Family".to_string()),
            0.95,
            "application-form",
            2,
        ),
        amount("liability.auto.payment", dec!(300)),
        observed("credit.score", FieldValue::Numeric(credit_score), 0.99, "credit-bureau", 1),
        observed("credit.bankruptcy", FieldValue::Flag(false), 0.99, "credit-bureau", 1),
    ]
}

fn appraisal() -> DocumentExtraction {
    DocumentExtraction::completed(
        "appraisal-report",
        vec![observed(
            "property.appraised_value",
            FieldValue::Numeric(dec!(650000)),
            0.97,
            "appraisal-report",
            3,
        )],
    )
}

fn paystub() -> DocumentExtraction {
    DocumentExtraction::completed(
        "paystub-2026-02",
        vec![observed(
            "income.b1.salary.amount",
            FieldValue::Numeric(dec!(132000)),
            0.81,
            "paystub-2026-02",
            1,
        )],
    )
}

fn case(case_id: &str, case_type: CaseType, documents: Vec<DocumentExtraction>) -> CaseBundle {
    let mut bundle = CaseBundle::new(case_id, case_type);
    bundle.documents = documents;
    bundle
}

/// Sample cases covering each decision outcome.
pub(crate) fn demo_cases() -> Vec<(&'static str, CaseBundle)> {
    let application =
        |score| DocumentExtraction::completed("application-form", application_candidates(score));

    let clean = case(
        "demo-clean",
        CaseType::ConventionalPurchase,
        vec![application(dec!(742)), appraisal()],
    );

    let conflicted = case(
        "demo-conflict",
        CaseType::ConventionalPurchase,
        vec![application(dec!(742)), appraisal(), paystub()],
    );

    let mut explained = case(
        "demo-override",
        CaseType::ConventionalPurchase,
        vec![application(dec!(742)), appraisal(), paystub()],
    );
    explained.overrides.push(FieldOverride {
        field: "income.b1.salary.amount".to_string(),
        value: FieldValue::Numeric(dec!(150000)),
        reason: "Employment letter confirms base salary; paystub excludes a retro adjustment"
            .to_string(),
        actor: "underwriter.demo".to_string(),
        recorded_at: demo_time(45),
    });

    let awaiting_appraisal = case(
        "demo-timeout",
        CaseType::InsuredPurchase,
        vec![
            application(dec!(742)),
            DocumentExtraction {
                document_id: DocumentId("appraisal-report".to_string()),
                outcome: ExtractionOutcome::TimedOut,
            },
        ],
    );

    let subprime = case(
        "demo-subprime",
        CaseType::ConventionalPurchase,
        vec![application(dec!(560)), appraisal()],
    );

    vec![
        ("Clean conventional purchase", clean),
        ("Conflicting salary evidence", conflicted),
        ("Salary conflict explained by override", explained),
        ("Insured purchase awaiting appraisal", awaiting_appraisal),
        ("Subprime credit", subprime),
    ]
}
