//! `steward validate`: run the static plan checks over a plan file.

use anyhow::{Context, bail};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::Path;
use steward_agent::planning::{PlanCorrector, PlanValidator};

pub fn run(plan_path: &Path, goal: &str, fix: bool) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(plan_path)
        .with_context(|| format!("reading {}", plan_path.display()))?;
    let (report, passed) = check(&raw, goal, fix)?;
    print!("{report}");
    if !passed && !fix {
        bail!("plan has critical issues");
    }
    Ok(())
}

/// Render the findings (and the corrected plan with `fix`). The flag is
/// whether the plan passed as given.
fn check(raw: &str, goal: &str, fix: bool) -> anyhow::Result<(String, bool)> {
    let plan: Map<String, Value> = match serde_json::from_str(raw).context("plan is not valid JSON")? {
        Value::Object(map) => map,
        _ => bail!("plan must be a JSON object with a \"steps\" array"),
    };

    let report = PlanValidator::new().validate(&plan, goal);
    let mut out = String::new();
    if report.issues.is_empty() {
        out.push_str("No issues found.\n");
    } else {
        let _ = writeln!(out, "{} issue(s):", report.issues.len());
        for issue in &report.issues {
            let _ = writeln!(out, "  {issue}");
            if let Some(hint) = &issue.suggested_fix {
                let _ = writeln!(out, "    fix: {hint}");
            }
        }
    }

    if fix {
        let corrected = PlanCorrector::new().correct(&plan, goal);
        let _ = writeln!(out, "\nCorrected plan:");
        let _ = writeln!(out, "{}", serde_json::to_string_pretty(&corrected)?);
    }
    Ok((out, report.is_valid()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELETE_ONLY: &str = r#"{"steps": [
        {"step_id": "step_1", "description": "delete", "action_type": "tool_call",
         "tool_name": "filesystem", "tool_params": {"action": "delete", "path": "<찾아진 파일 경로>"}}
    ]}"#;

    #[test]
    fn reports_critical_issues() {
        let (out, passed) = check(DELETE_ONLY, "delete screenshot files", false).unwrap();
        assert!(!passed);
        assert!(out.contains("Critical"));
        assert!(!out.contains("Corrected plan"));
    }

    #[test]
    fn fix_prints_plan_with_exploration_step() {
        let (out, _) = check(DELETE_ONLY, "delete screenshot files", true).unwrap();
        assert!(out.contains("Corrected plan"));
        assert!(out.contains("step_exploration"));
    }

    #[test]
    fn rejects_non_object_plans() {
        assert!(check("[1, 2]", "g", false).is_err());
        assert!(check("not json", "g", false).is_err());
    }
}
