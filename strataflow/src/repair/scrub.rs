//! Comment stripping and punctuation cleanup.
//!
//! The primary passes track string literals so that `//` inside a URL or a
//! comma inside a sentence is never touched. The aggressive pass does not.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid blank line pattern"));

#[allow(clippy::expect_used)]
static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"//.*").expect("valid comment pattern"));

#[allow(clippy::expect_used)]
static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"));

#[allow(clippy::expect_used)]
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("valid comma pattern"));

#[allow(clippy::expect_used)]
static REPEATED_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*,+").expect("valid comma pattern"));

/// Removes `//` and `/* */` comments outside string literals.
///
/// Returns the cleaned text and whether anything was removed. An unterminated
/// block comment runs to the end of the text.
#[must_use]
pub fn strip_comments(text: &str) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut removed = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (ch, chars.peek().copied()) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                removed = true;
                while chars.peek().is_some_and(|c| *c != '\n' && *c != '\r') {
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                removed = true;
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    (out, removed)
}

/// Drops repeated commas and commas directly before `}` or `]`, outside
/// string literals. Returns the text and the number of commas dropped.
#[must_use]
pub fn normalize_commas(text: &str) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut dropped = 0;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if in_string {
            out.push(ch);
            if ch == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if ch == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some(',' | '}' | ']')) {
                dropped += 1;
                i += 1;
                continue;
            }
        } else if ch == '"' {
            in_string = true;
        }

        out.push(ch);
        i += 1;
    }

    (out, dropped)
}

/// Collapses runs of blank lines into a single line break.
#[must_use]
pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_LINES.replace_all(text, "\n").into_owned()
}

/// The laxer second attempt: strips anything that looks like a comment,
/// even inside strings, drops empty lines and re-fixes commas.
#[must_use]
pub fn aggressive_clean(text: &str) -> String {
    let without_line = LINE_COMMENT.replace_all(text, "");
    let without_block = BLOCK_COMMENT.replace_all(&without_line, "");

    let joined = without_block
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let trailing = TRAILING_COMMA.replace_all(&joined, "$1");
    REPEATED_COMMA.replace_all(&trailing, ",").into_owned()
}
