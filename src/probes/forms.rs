use super::{band, json_array, Probe, ProbeOutcome, TestResult, TestType, VIOLATION_FAIL_THRESHOLD};
use crate::bugs::Finding;
use crate::session::PageSession;
use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Per-form structure: submit control presence plus every field's type,
/// name and required flag.
pub const FORMS_SCRIPT: &str = r#"() => {
    return Array.from(document.querySelectorAll('form')).map(form => ({
        hasSubmit: !!form.querySelector("button[type='submit'], input[type='submit']"),
        fields: Array.from(form.querySelectorAll('input, textarea, select')).map(el => ({
            type: el.getAttribute('type') || el.tagName.toLowerCase(),
            name: el.getAttribute('name'),
            required: el.hasAttribute('required')
        }))
    }));
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FormShape {
    has_submit: bool,
    #[serde(default)]
    fields: Vec<FieldShape>,
}

#[derive(Debug, Deserialize)]
struct FieldShape {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    required: bool,
}

fn form_issues(form: &FormShape) -> Vec<String> {
    let mut issues = Vec::new();
    if !form.has_submit {
        issues.push("No submit button found".to_string());
    }
    for field in &form.fields {
        let unnamed = field.name.as_deref().map_or(true, |n| n.trim().is_empty());
        if field.required && unnamed {
            issues.push(format!(
                "Required {} input missing name attribute",
                field.kind.as_deref().unwrap_or("text")
            ));
        }
    }
    issues
}

/// Structural form checks that need no interaction.
pub struct FormValidationProbe;

#[async_trait::async_trait]
impl Probe for FormValidationProbe {
    fn test_type(&self) -> TestType {
        TestType::FormValidation
    }

    async fn check(&self, session: &mut dyn PageSession, _target: &str) -> Result<ProbeOutcome> {
        let forms = json_array(session.evaluate(FORMS_SCRIPT).await?);

        let mut findings = Vec::new();
        for (form_index, raw) in forms.into_iter().enumerate() {
            let form: FormShape = match serde_json::from_value(raw) {
                Ok(form) => form,
                Err(e) => {
                    debug!(form_index, "Ignoring unreadable form: {}", e);
                    continue;
                }
            };
            for issue in form_issues(&form) {
                findings.push(Finding::FormIssue { form_index, issue });
            }
        }

        let issues: Vec<_> = findings
            .iter()
            .filter_map(|f| match f {
                Finding::FormIssue { form_index, issue } => {
                    Some(json!({"form_index": form_index, "issue": issue}))
                }
                _ => None,
            })
            .collect();
        let count = issues.len();

        let result = TestResult::new(
            TestType::FormValidation,
            band(count, VIOLATION_FAIL_THRESHOLD),
            format!("Form validation test completed. Found {} issues.", count),
        )
        .with_detail("form_issues_count", count)
        .with_detail("form_issues", issues);

        Ok(ProbeOutcome::with_findings(result, findings))
    }
}
