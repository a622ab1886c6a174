//! Builds the input message sent to a stage's remote agent.

use crate::context::{StageContext, UpstreamResult};
use crate::core::{render_value, StageResult};
use crate::pipeline::StageDefinition;
use serde_json::Value;
use std::collections::HashMap;

/// Maximum number of fields summarized per dependency.
pub const MAX_SUMMARY_FIELDS: usize = 12;

/// Maximum rendered length of a single summarized value, in characters.
pub const MAX_SUMMARY_VALUE_CHARS: usize = 400;

/// Output rules appended to every stage message.
pub const OUTPUT_FORMAT_INSTRUCTIONS: &str = "\
OUTPUT FORMAT REQUIREMENTS:
1. Produce STRICTLY VALID JSON with NO comments (//, /* */).
2. Do NOT use elisions such as \"// ... (X more items)\".
3. If you cannot produce every element, only include elements you can complete entirely.
4. EVERY element of the JSON must be complete and valid.
5. The JSON must parse directly without any cleanup.

RESPOND ONLY WITH VALID JSON, NOTHING ELSE.";

/// Renders the message for `definition` from its context.
///
/// Dependencies are summarized, not copied: for each available dependency,
/// the values of the indicators it declares (looked up anywhere in its
/// document) are listed, falling back to its top-level scalar fields.
#[must_use]
pub fn build_stage_message(
    definition: &StageDefinition,
    context: &StageContext,
    indicators: &HashMap<String, Vec<String>>,
) -> String {
    let mut out = String::new();

    let title = if definition.full_name.is_empty() {
        &definition.name
    } else {
        &definition.full_name
    };
    out.push_str(&format!("# {} - {}\n", definition.id, title));
    if !definition.description.is_empty() {
        out.push_str(&format!("\n{}\n", definition.description));
    }

    out.push_str("\n## Questionnaire\n");
    if context.questionnaire().is_empty() {
        out.push_str("- no data provided\n");
    }
    for (key, value) in context.questionnaire().fields() {
        out.push_str(&format!("- {key}: {}\n", render_value(value)));
    }

    if !context.upstream().is_empty() {
        out.push_str("\n## Upstream results\n");
        for (stage_id, upstream) in context.upstream() {
            match upstream {
                UpstreamResult::Available { result } => {
                    out.push_str(&format!("\n### {stage_id}\n"));
                    let declared = indicators.get(stage_id).map_or(&[][..], Vec::as_slice);
                    for (key, value) in summarize(result, declared) {
                        out.push_str(&format!("- {key}: {value}\n"));
                    }
                }
                UpstreamResult::Unavailable { reason } => {
                    out.push_str(&format!("\n### {stage_id}: unavailable ({reason})\n"));
                }
            }
        }
    }

    out.push('\n');
    out.push_str(OUTPUT_FORMAT_INSTRUCTIONS);
    out
}

/// Picks the fields of `result` worth forwarding downstream.
fn summarize(result: &StageResult, declared: &[String]) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = declared
        .iter()
        .filter_map(|name| result.find(name).map(|v| (name.clone(), truncate(&render_value(v)))))
        .take(MAX_SUMMARY_FIELDS)
        .collect();

    if fields.is_empty() {
        fields = result
            .data
            .iter()
            .filter(|(_, v)| !matches!(v, Value::Object(_) | Value::Array(_)))
            .map(|(k, v)| (k.clone(), truncate(&render_value(v))))
            .take(MAX_SUMMARY_FIELDS)
            .collect();
    }

    if fields.is_empty() {
        fields.push(("summary".to_string(), "no scalar indicators".to_string()));
    }
    fields
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= MAX_SUMMARY_VALUE_CHARS {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(MAX_SUMMARY_VALUE_CHARS).collect();
    cut.push_str("...");
    cut
}
