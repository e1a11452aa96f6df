//! Plan and run report formatting

use crate::orchestrator::{Plan, RunReport};

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a dry run as a table of units and the deletions each would trigger
pub fn format_plan(plan: &Plan) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Backup plan ({} mode, label {})\n\n",
        plan.mode, plan.label
    ));

    let source_width = plan
        .units
        .iter()
        .map(|u| u.transfer.source_ref.len())
        .max()
        .unwrap_or(6)
        .max(6);

    output.push_str(&format!(
        "{:<source_width$}  {}\n",
        "Source",
        "Object key",
        source_width = source_width,
    ));
    output.push_str(&format!(
        "{:-<source_width$}  {:-<10}\n",
        "",
        "",
        source_width = source_width,
    ));

    for (unit, victims) in plan.units.iter().zip(&plan.victims) {
        output.push_str(&format!(
            "{:<source_width$}  {}\n",
            unit.transfer.source_ref,
            unit.transfer.object_key,
            source_width = source_width,
        ));
        for key in victims {
            output.push_str(&format!(
                "{:<source_width$}    would delete {}\n",
                "",
                key,
                source_width = source_width,
            ));
        }
    }

    let deletions: usize = plan.victims.iter().map(Vec::len).sum();
    output.push_str(&format!(
        "\n{} unit(s), {} deletion(s)\n",
        plan.units.len(),
        deletions
    ));
    output
}

/// Format a successful run
pub fn format_report(report: &RunReport) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "Backup {} of {} complete (run {})\n\n",
        report.label, report.pool, report.run_id
    ));

    for unit in &report.units {
        output.push_str(&format!(
            "  {}\n    key:     {}\n    read:    {}\n    written: {}\n    time:    {:.1}s\n",
            unit.dataset,
            unit.transfer.object_key,
            format_bytes(unit.transfer.bytes_read),
            format_bytes(unit.transfer.bytes_written),
            unit.transfer.duration.as_secs_f64(),
        ));
        for eviction in &unit.evictions {
            for key in &eviction.deleted {
                output.push_str(&format!("    deleted: {}\n", key));
            }
            for (key, error) in &eviction.failed {
                output.push_str(&format!("    FAILED to delete {}: {}\n", key, error));
            }
        }
    }

    output.push_str(&format!(
        "\nTotal: {} uploaded, {} old backup(s) deleted in {:.1}s\n",
        format_bytes(report.bytes_written()),
        report.evicted(),
        report.duration.as_secs_f64()
    ));

    let failed = report.failed_deletes().len();
    if failed > 0 {
        output.push_str(&format!(
            "Warning: {} deletion(s) failed; they will be retried by the next run\n",
            failed
        ));
    }
    if !report.snapshot_destroyed {
        output.push_str(&format!(
            "Warning: snapshot {}@{} could not be destroyed\n",
            report.pool, report.label
        ));
    }
    output
}
