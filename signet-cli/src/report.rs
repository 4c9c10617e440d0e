//! Human-readable rendering of sync results.

use signet_core::{BindingOutcome, DispatchReport, OutcomeStatus, SyncLedgerEntry};

/// One line per binding, plus indented detail lines.
pub fn render_outcome(outcome: &BindingOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    let key = &outcome.key;

    match &outcome.status {
        OutcomeStatus::Recorded { receipt } => {
            lines.push(format!("  {} synced", key));
            lines.extend(receipt.warnings.iter().map(|w| format!("    warning: {}", w)));
        }
        OutcomeStatus::Blocked { findings } => {
            lines.push(format!("  {} blocked", key));
            lines.extend(
                findings
                    .iter()
                    .map(|f| format!("    {}: {}", f.code, f.message)),
            );
        }
        OutcomeStatus::Conflict { detail } => {
            lines.push(format!("  {} conflict: {}", key, detail));
        }
        OutcomeStatus::Failed { error } => {
            lines.push(format!("  {} failed: {}", key, error));
        }
        OutcomeStatus::Skipped => lines.push(format!("  {} skipped (cancelled)", key)),
    }

    if let Some(error) = outcome.error() {
        lines.push(format!("    fix: {}", error.remediation()));
    }

    lines.extend(
        outcome
            .advisories
            .iter()
            .map(|f| format!("    note: {}", f.message)),
    );

    lines
}

pub fn render_report(report: &DispatchReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Signature {}: {} of {} binding(s) synced",
        report.signature_id,
        report.recorded(),
        report.outcomes.len()
    )];
    for outcome in &report.outcomes {
        lines.extend(render_outcome(outcome));
    }
    lines
}

pub fn render_ledger_entry(entry: &SyncLedgerEntry) -> String {
    let state = if entry.conflict { "CONFLICT" } else { "ok" };
    format!(
        "  {:<48} {:<8} {} {}",
        entry.key.to_string(),
        state,
        entry.last_synced_at.format("%Y-%m-%d %H:%M:%S"),
        entry.content_hash.get(..12).unwrap_or(&entry.content_hash)
    )
}
