use std::fmt::Write;

use crate::plan::ExecutionPlan;
use crate::status::PlanStatus;

/// Render a plan as Markdown for review or reporting.
pub fn format_plan(plan: &ExecutionPlan) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Execution plan: {}\n", plan.description);
    let _ = writeln!(out, "Plan ID: {}", plan.id);
    let _ = writeln!(out, "Status: {}", plan.status());

    if plan.options.require_approval {
        match plan.approved_by() {
            Some(user) if plan.is_approved() => {
                let _ = writeln!(out, "Approval: ✅ approved by {}", user);
            }
            _ => {
                let _ = writeln!(out, "Approval: ⏳ pending");
            }
        }
    }

    let summary = plan.summary();
    if plan.status() != PlanStatus::Draft || summary.total > summary.pending {
        let _ = writeln!(
            out,
            "Progress: {}/{} completed, {} failed, {} skipped",
            summary.completed, summary.total, summary.failed, summary.skipped
        );
    }
    out.push('\n');

    out.push_str("## Steps\n\n");
    for (i, step) in plan.steps.iter().enumerate() {
        let _ = writeln!(
            out,
            "### Step {}: {} {}",
            i + 1,
            step.description,
            step.status().icon()
        );
        let _ = writeln!(out, "- Tool: `{}`", step.tool_name);

        if !step.parameters.is_empty() {
            out.push_str("- Parameters:\n");
            let mut keys: Vec<&String> = step.parameters.keys().collect();
            keys.sort();
            for key in keys {
                let _ = writeln!(out, "  - {}: {}", key, step.parameters[key]);
            }
        }

        if !step.depends_on.is_empty() {
            let _ = writeln!(out, "- Depends on: {}", step.depends_on.join(", "));
        }

        if let Some(ms) = step.elapsed_ms() {
            let _ = writeln!(out, "- Elapsed: {}ms", ms);
        }

        if let Some(error) = step.error() {
            let _ = writeln!(out, "- Error: {}", error);
        }

        out.push('\n');
    }

    out
}
