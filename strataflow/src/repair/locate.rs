//! Locating the structured payload inside a free-text reply.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid fence pattern"));

#[allow(clippy::expect_used)]
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("valid fence pattern"));

/// Where the payload was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    /// A fence tagged `json`.
    JsonFence,
    /// An untagged fence.
    AnyFence,
    /// An opening fence whose closing fence was cut off.
    OpenFence,
    /// First `{` to last `}` of the raw text.
    BraceSpan,
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonFence => write!(f, "json_fence"),
            Self::AnyFence => write!(f, "any_fence"),
            Self::OpenFence => write!(f, "open_fence"),
            Self::BraceSpan => write!(f, "brace_span"),
        }
    }
}

/// Finds the payload: a `json` fence, then any fence, then a fence left
/// open by truncated output, then the brace span.
#[must_use]
pub fn locate_payload(raw: &str) -> Option<(&str, PayloadSource)> {
    if let Some(m) = JSON_FENCE.captures(raw).and_then(|c| c.get(1)) {
        return Some((m.as_str().trim(), PayloadSource::JsonFence));
    }
    if let Some(m) = ANY_FENCE.captures(raw).and_then(|c| c.get(1)) {
        return Some((m.as_str().trim(), PayloadSource::AnyFence));
    }
    if let Some(idx) = raw.find("```") {
        let rest = raw[idx + 3..].trim_start();
        let rest = rest.strip_prefix("json").unwrap_or(rest).trim();
        if rest.starts_with('{') || rest.starts_with('[') {
            return Some((rest, PayloadSource::OpenFence));
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| (&raw[start..=end], PayloadSource::BraceSpan))
}
