//! Structural balancing for truncated documents.
//!
//! This is a lossy fallback: it makes the text parse, it does not restore
//! whatever content was cut off.

/// Result of a balancing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balanced {
    /// The balanced text.
    pub text: String,
    /// Closers inserted before a mismatched closer.
    pub inserted: usize,
    /// Closers appended at the end.
    pub appended: usize,
    /// Whether an unterminated string literal was closed.
    pub closed_string: bool,
}

impl Balanced {
    /// Returns true if the pass changed anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.appended > 0 || self.closed_string
    }
}

const fn closer_for(opener: char) -> char {
    if opener == '{' {
        '}'
    } else {
        ']'
    }
}

/// Closes every structure left open.
///
/// A closer that does not match the innermost open structure first closes
/// the structures nested inside its own opener. A closer with no opener at
/// all is left for the parser to report.
#[must_use]
pub fn balance(text: &str) -> Balanced {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut inserted = 0;

    for ch in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' | '[' => stack.push(ch),
            '}' | ']' => {
                let opener = if ch == '}' { '{' } else { '[' };
                if let Some(depth) = stack.iter().rposition(|c| *c == opener) {
                    for inner in stack.drain(depth + 1..).rev() {
                        out.push(closer_for(inner));
                        inserted += 1;
                    }
                    stack.pop();
                }
            }
            _ => {}
        }
        out.push(ch);
    }

    let closed_string = in_string;
    if closed_string {
        out.push('"');
    }

    let appended = stack.len();
    while let Some(opener) = stack.pop() {
        out.push(closer_for(opener));
    }

    Balanced {
        text: out,
        inserted,
        appended,
        closed_string,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_balanced_text_untouched() {
        let text = r#"{"a": [1, {"b": "}]"}]}"#;
        let out = balance(text);
        assert_eq!(out.text, text);
        assert!(!out.changed());
    }

    #[test]
    fn test_appends_innermost_first() {
        let out = balance(r#"{"a": [{"b": 1"#);
        assert_eq!(out.text, r#"{"a": [{"b": 1}]}"#);
        assert_eq!(out.appended, 3);
        assert_eq!(out.inserted, 0);
    }

    #[test]
    fn test_mismatched_closer_closes_inner_structures() {
        let out = balance(r#"{"a": 1, "b": [1,2}"#);
        assert_eq!(out.text, r#"{"a": 1, "b": [1,2]}"#);
        assert_eq!(out.inserted, 1);
        assert_eq!(out.appended, 0);
    }

    #[test]
    fn test_closes_truncated_string() {
        let out = balance(r#"{"summary": "cut in the mid"#);
        assert_eq!(out.text, r#"{"summary": "cut in the mid"}"#);
        assert!(out.closed_string);
    }

    #[test]
    fn test_stray_closer_left_in_place() {
        let out = balance("{}]");
        assert_eq!(out.text, "{}]");
        assert!(!out.changed());
    }
}
