//! Table rendering for run reports and mapping previews.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use orgmimic_core::models::{PairStatus, RunReport};
use orgmimic_core::transplant::MappingPreview;

pub fn render_report(report: &RunReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Target", "Source", "Status", "Walked", "Eligible", "Reconciled", "Dropped", "Detail",
    ]);

    for pair in &report.pairs {
        let (status, detail) = match &pair.status {
            PairStatus::Published {
                branch,
                tip,
                rewritten,
            } => {
                let label = if *rewritten { "✓ rewritten" } else { "✓ mirrored" };
                (
                    Cell::new(label).fg(Color::Green),
                    format!("{} @ {}", branch, &tip[..tip.len().min(12)]),
                )
            }
            PairStatus::Skipped { reason } => {
                (Cell::new("– skipped").fg(Color::Yellow), reason.clone())
            }
            PairStatus::Failed { error } => (Cell::new("✗ failed").fg(Color::Red), error.clone()),
        };
        table.add_row(vec![
            Cell::new(&pair.target),
            Cell::new(&pair.source),
            status,
            Cell::new(pair.stats.walked),
            Cell::new(pair.stats.eligible),
            Cell::new(pair.stats.reconciled),
            Cell::new(pair.stats.dropped_paths),
            Cell::new(detail),
        ]);
    }
    table.to_string()
}

pub fn render_mappings(previews: &[MappingPreview]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Target", "Source", "Contributor", "Commits", "Login", "Email"]);

    for preview in previews {
        for mapped in &preview.mapped {
            table.add_row(vec![
                Cell::new(&preview.target),
                Cell::new(&preview.source),
                Cell::new(&mapped.source_email),
                Cell::new(mapped.commit_count),
                Cell::new(&mapped.identity.login),
                Cell::new(&mapped.identity.email),
            ]);
        }
        for login in &preview.unmatched {
            table.add_row(vec![
                Cell::new(&preview.target),
                Cell::new(&preview.source),
                Cell::new("-").fg(Color::DarkGrey),
                Cell::new(0),
                Cell::new(login),
                Cell::new("no contributor left").fg(Color::DarkGrey),
            ]);
        }
    }
    table.to_string()
}
