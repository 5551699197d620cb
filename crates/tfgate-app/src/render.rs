//! Human-facing renderings of a scenario receipt.

use tfgate_types::{
    CheckStatus, ScenarioReceipt, StepRecord, StepStatus, TeardownStatus, VerdictStatus,
};

const VALUE_PREVIEW_CHARS: usize = 60;

pub fn render_markdown(receipt: &ScenarioReceipt) -> String {
    let mut out = String::new();

    let header = match receipt.verdict.status {
        VerdictStatus::Pass => "✅ tfgate: pass",
        VerdictStatus::Fail => "❌ tfgate: fail",
    };
    out.push_str(header);
    out.push_str("\n\n");

    out.push_str(&format!("**Scenario:** `{}`\n", receipt.scenario.name));
    out.push_str(&format!(
        "**Module:** `{}`\n\n",
        receipt.scenario.terraform_dir
    ));

    out.push_str("| step | attempts | wall | status |\n");
    out.push_str("|---|---:|---:|---|\n");
    for step in &receipt.steps {
        out.push_str(&format!(
            "| {label} | {attempts} | {wall} | {status} |\n",
            label = step_label(step),
            attempts = step.attempts,
            wall = format_ms(step.wall_ms),
            status = match step.status {
                StepStatus::Ok => "✅",
                StepStatus::Error => "❌",
            },
        ));
    }

    if !receipt.checks.is_empty() {
        out.push_str("\n| output | value | check |\n");
        out.push_str("|---|---|---|\n");
        for check in &receipt.checks {
            let value = receipt
                .outputs
                .get(&check.output)
                .map(String::as_str)
                .unwrap_or("");
            out.push_str(&format!(
                "| `{name}` | {value} | {status} |\n",
                name = check.output,
                value = preview(value),
                status = match check.status {
                    CheckStatus::Pass => "✅",
                    CheckStatus::Fail => "❌",
                },
            ));
        }
    }

    out.push_str(&format!(
        "\n**Teardown:** {}\n",
        match receipt.teardown.status {
            TeardownStatus::Ok => "destroyed",
            TeardownStatus::Error => "FAILED, resources may remain",
        }
    ));

    if !receipt.verdict.reasons.is_empty() {
        out.push_str("\n**Notes:**\n");
        for r in &receipt.verdict.reasons {
            out.push_str(&format!("- {}\n", single_line(r)));
        }
    }

    out
}

pub fn github_annotations(receipt: &ScenarioReceipt) -> Vec<String> {
    let mut lines = Vec::new();
    let scenario = single_line(&receipt.scenario.name);

    if let Some(fatal) = &receipt.fatal {
        lines.push(format!(
            "::error::tfgate {scenario}: {}",
            single_line(&fatal.message)
        ));
    }

    for check in receipt.failed_checks() {
        lines.push(format!(
            "::error::tfgate {scenario}: {}",
            single_line(&check.message)
        ));
    }

    if receipt.teardown.status == TeardownStatus::Error {
        let detail = receipt.teardown.error.as_deref().unwrap_or("unknown error");
        lines.push(format!(
            "::error::tfgate {scenario}: teardown failed, resources may remain: {}",
            single_line(detail)
        ));
    }

    for step in &receipt.steps {
        if step.status == StepStatus::Ok && step.attempts > 1 {
            lines.push(format!(
                "::warning::tfgate {scenario}: {} needed {} attempts",
                single_line(&step_label(step)),
                step.attempts
            ));
        }
    }

    lines
}

fn step_label(step: &StepRecord) -> String {
    match &step.name {
        Some(name) => format!("{} `{}`", step.step.as_str(), name),
        None => step.step.as_str().to_string(),
    }
}

fn format_ms(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

fn preview(value: &str) -> String {
    if value.is_empty() {
        return "_(empty)_".to_string();
    }
    let one_line = single_line(value).replace('|', "\\|");
    if one_line.chars().count() > VALUE_PREVIEW_CHARS {
        let cut: String = one_line.chars().take(VALUE_PREVIEW_CHARS).collect();
        format!("`{cut}…`")
    } else {
        format!("`{one_line}`")
    }
}

// Workflow commands and Markdown list items end at a newline.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
