//! Result repair pipeline.
//!
//! Turns the free-text reply of a remote agent into a structured document:
//!
//! 1. locate the payload (json fence, any fence, unclosed fence, brace span)
//! 2. strip comments outside string literals
//! 3. normalize commas and blank lines
//! 4. balance open structures (lossy fallback for truncated output)
//! 5. parse, and on failure retry once with an aggressive cleanup
//!
//! The pipeline never returns guessed data: either a parsed document or a
//! [`RepairError`].

mod balance;
mod locate;
mod scrub;

pub use balance::{balance, Balanced};
pub use locate::{locate_payload, PayloadSource};
pub use scrub::{aggressive_clean, collapse_blank_lines, normalize_commas, strip_comments};

use crate::errors::RepairError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Default number of characters kept on each side of a parse failure.
pub const DEFAULT_WINDOW_RADIUS: usize = 150;

/// Which repairs were needed to obtain a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Where the payload was found.
    pub source: PayloadSource,
    /// Whether comments were removed.
    pub comments_removed: bool,
    /// Number of commas dropped.
    pub commas_dropped: usize,
    /// Closers inserted or appended by balancing.
    pub closers_added: usize,
    /// Whether a truncated string literal was closed.
    pub string_closed: bool,
    /// Whether the aggressive retry produced the document.
    pub aggressive: bool,
}

impl RepairReport {
    fn new(source: PayloadSource) -> Self {
        Self {
            source,
            comments_removed: false,
            commas_dropped: 0,
            closers_added: 0,
            string_closed: false,
            aggressive: false,
        }
    }

    /// Returns true if the document needed any textual repair.
    #[must_use]
    pub fn was_repaired(&self) -> bool {
        self.comments_removed
            || self.commas_dropped > 0
            || self.closers_added > 0
            || self.string_closed
            || self.aggressive
    }
}

/// Diagnostics captured for the last document that could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFailure {
    /// Where the payload was found.
    pub source: PayloadSource,
    /// Text after the primary passes.
    pub cleaned: String,
    /// Text after the aggressive pass.
    pub aggressive: String,
    /// Parser message of the final attempt.
    pub message: String,
    /// 1-based line of the failure.
    pub line: usize,
    /// 1-based column of the failure.
    pub column: usize,
    /// Byte offset of the failure in `aggressive`.
    pub position: usize,
    /// Text surrounding the failure.
    pub window: String,
    /// When the failure happened.
    pub recorded_at: DateTime<Utc>,
}

impl RepairFailure {
    /// Converts to the error returned to callers.
    #[must_use]
    pub fn to_error(&self) -> RepairError {
        RepairError::UnrepairableDocument {
            message: self.message.clone(),
            line: self.line,
            column: self.column,
            position: self.position,
            window: self.window.clone(),
        }
    }
}

/// Repairs remote replies into documents, keeping the last failure around
/// for debugging.
#[derive(Debug)]
pub struct ResultRepairer {
    window_radius: usize,
    last_failure: Mutex<Option<RepairFailure>>,
}

impl Default for ResultRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultRepairer {
    /// Creates a repairer with the default diagnostic window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window_radius: DEFAULT_WINDOW_RADIUS,
            last_failure: Mutex::new(None),
        }
    }

    /// Sets how many characters of context are kept around a failure.
    #[must_use]
    pub fn with_window_radius(mut self, radius: usize) -> Self {
        self.window_radius = radius;
        self
    }

    /// Returns the diagnostics of the most recent failure, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<RepairFailure> {
        self.last_failure.lock().clone()
    }

    /// Forgets the last failure.
    pub fn clear_last_failure(&self) {
        *self.last_failure.lock() = None;
    }

    /// Extracts and parses the document contained in `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError::NoPayloadFound`] if nothing resembling a document
    /// exists and [`RepairError::UnrepairableDocument`] if both attempts fail.
    pub fn repair(&self, raw: &str) -> Result<(Value, RepairReport), RepairError> {
        let Some((payload, source)) = locate_payload(raw) else {
            return Err(RepairError::NoPayloadFound {
                length: raw.chars().count(),
            });
        };
        debug!(source = %source, length = payload.len(), "Located payload");

        let mut report = RepairReport::new(source);

        let (text, comments_removed) = strip_comments(payload);
        report.comments_removed = comments_removed;

        let (text, dropped) = normalize_commas(&text);
        report.commas_dropped += dropped;
        let text = collapse_blank_lines(&text);

        let balanced = balance(&text);
        let cleaned = if balanced.changed() {
            warn!(
                inserted = balanced.inserted,
                appended = balanced.appended,
                closed_string = balanced.closed_string,
                "Balanced unterminated structures"
            );
            report.closers_added = balanced.inserted + balanced.appended;
            report.string_closed = balanced.closed_string;
            let (text, dropped) = normalize_commas(&balanced.text);
            report.commas_dropped += dropped;
            text
        } else {
            balanced.text
        };
        let cleaned = cleaned.trim().to_string();

        let first_error = match serde_json::from_str::<Value>(&cleaned) {
            Ok(value) => return Ok((value, report)),
            Err(e) => e,
        };

        let position = byte_offset(&cleaned, first_error.line(), first_error.column());
        warn!(
            error = %first_error,
            context = %context_window(&cleaned, position, self.window_radius),
            "Initial parse failed, retrying with aggressive cleanup"
        );

        let aggressive = aggressive_clean(&cleaned);
        match serde_json::from_str::<Value>(&aggressive) {
            Ok(value) => {
                report.aggressive = true;
                Ok((value, report))
            }
            Err(e) => {
                let position = byte_offset(&aggressive, e.line(), e.column());
                let failure = RepairFailure {
                    source,
                    message: e.to_string(),
                    line: e.line(),
                    column: e.column(),
                    position,
                    window: context_window(&aggressive, position, self.window_radius),
                    cleaned,
                    aggressive,
                    recorded_at: Utc::now(),
                };
                let err = failure.to_error();
                tracing::error!(error = %err, "Document could not be repaired");
                *self.last_failure.lock() = Some(failure);
                Err(err)
            }
        }
    }

    /// Like [`Self::repair`], but requires the document to be an object.
    ///
    /// # Errors
    ///
    /// Returns [`RepairError::MalformedDocument`] for arrays and scalars, plus
    /// every error of [`Self::repair`].
    pub fn repair_object(&self, raw: &str) -> Result<(Map<String, Value>, RepairReport), RepairError> {
        let (value, report) = self.repair(raw)?;
        match value {
            Value::Object(map) => Ok((map, report)),
            other => Err(RepairError::MalformedDocument {
                found: value_kind(&other),
            }),
        }
    }
}

/// Converts a 1-based line/column pair into a byte offset into `text`.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    let mut offset = (line_start + column.saturating_sub(1)).min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Returns up to `radius` characters on each side of `position`.
fn context_window(text: &str, position: usize, radius: usize) -> String {
    let before = &text[..position];
    let start = before
        .char_indices()
        .rev()
        .nth(radius.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    let after = &text[position..];
    let end = after
        .char_indices()
        .nth(radius)
        .map_or(text.len(), |(i, _)| position + i);
    text[start..end].to_string()
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
