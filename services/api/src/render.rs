use underwriting::workflows::underwriting::{CaseAssessment, FindingStatus};

/// Plain-text report of one assessment for terminal output.
pub(crate) fn assessment_lines(assessment: &CaseAssessment) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Case {} ({}) evaluated against {}",
            assessment.case_id,
            assessment.case_type.label(),
            assessment.rule_set
        ),
        format!(
            "- Decision: {} | risk {}",
            assessment.decision.summary(),
            assessment.risk.tier.label()
        ),
    ];

    if !assessment.calculations.is_empty() {
        lines.push("Calculations:".to_string());
    }
    for result in assessment.calculations.iter() {
        let percentage = result.kind.is_percentage();
        let stressed = result
            .stressed
            .as_ref()
            .map(|value| format!(" | stressed {}", value.display(percentage)))
            .unwrap_or_default();
        lines.push(format!(
            "  - {}: {}{} [{}]",
            result.kind,
            result.value.display(percentage),
            stressed,
            result.status.label()
        ));
    }

    lines.push("Findings:".to_string());
    for finding in &assessment.findings {
        lines.push(format!(
            "  - [{}/{}] {}",
            finding.status.label(),
            finding.severity.label(),
            finding.message
        ));
        if finding.status != FindingStatus::Pass {
            if let Some(action) = &finding.remedial_action {
                lines.push(format!("      remedial: {action}"));
            }
        }
        for gap in &finding.gaps {
            lines.push(format!("      gap: {gap}"));
        }
    }

    let conflicts: Vec<_> = assessment.fields.unresolved_conflicts().collect();
    if !conflicts.is_empty() {
        lines.push("Unresolved conflicts:".to_string());
        for field in conflicts {
            lines.push(format!(
                "  - {} = {} from {} candidate(s)",
                field.field,
                field.value,
                field.candidates.len()
            ));
        }
    }

    lines
}

pub(crate) fn print_assessment(assessment: &CaseAssessment) {
    for line in assessment_lines(assessment) {
        println!("{line}");
    }
}
