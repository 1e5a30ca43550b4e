//! Quote-aware tokenizer for predicate text.
//!
//! Splits a predicate into unquoted text and quoted literals with an explicit
//! three-state machine, so variable substitution never reaches inside a
//! literal no matter which quote characters the literal contains.

/// Stands for a `'` inside a normalized literal until rendering completes
pub const SINGLE_QUOTE_PLACEHOLDER: char = '\u{E000}';

/// Stands for a `"` inside a normalized literal until rendering completes
pub const DOUBLE_QUOTE_PLACEHOLDER: char = '\u{E001}';

/// A piece of predicate text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text outside any quotes, verbatim
    Text(String),
    /// Content of a quoted literal with escapes decoded
    Literal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    SingleQuote,
    DoubleQuote,
}

/// Splits text into [`Segment`]s. A backslash inside a literal escapes the
/// next character. An unterminated literal is kept as text, quote included.
pub fn tokenize(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut state = State::Normal;
    let mut current = String::new();
    let mut literal_start = 0;
    let mut chars = text.char_indices();

    while let Some((idx, c)) = chars.next() {
        match state {
            State::Normal => match c {
                '\'' | '"' => {
                    if !current.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut current)));
                    }
                    literal_start = idx;
                    state = if c == '\'' {
                        State::SingleQuote
                    } else {
                        State::DoubleQuote
                    };
                }
                _ => current.push(c),
            },
            State::SingleQuote | State::DoubleQuote => {
                let closing = if state == State::SingleQuote { '\'' } else { '"' };
                if c == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == closing {
                    segments.push(Segment::Literal(std::mem::take(&mut current)));
                    state = State::Normal;
                } else {
                    current.push(c);
                }
            }
        }
    }

    match state {
        State::Normal => {
            if !current.is_empty() {
                segments.push(Segment::Text(current));
            }
        }
        _ => segments.push(Segment::Text(text[literal_start..].to_string())),
    }

    segments
}

/// Renders literal content in single-quote form with quote placeholders.
pub fn quote_literal(content: &str) -> String {
    let mut ret = String::with_capacity(content.len() + 2);
    ret.push('\'');
    for c in content.chars() {
        match c {
            '\\' => ret.push_str("\\\\"),
            '\'' => ret.push(SINGLE_QUOTE_PLACEHOLDER),
            '"' => ret.push(DOUBLE_QUOTE_PLACEHOLDER),
            other => ret.push(other),
        }
    }
    ret.push('\'');
    ret
}

/// Replaces the quote placeholders with their final escaped form.
pub fn restore_quotes(text: &str) -> String {
    let mut ret = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            SINGLE_QUOTE_PLACEHOLDER => ret.push_str("\\'"),
            DOUBLE_QUOTE_PLACEHOLDER => ret.push('"'),
            other => ret.push(other),
        }
    }
    ret
}

/// Rewrites every quoted literal to single-quote form, leaving embedded
/// quotes as placeholders.
pub fn normalize_quotes(text: &str) -> String {
    tokenize(text)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(t) => t,
            Segment::Literal(l) => quote_literal(&l),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_mixed_quotes() {
        let segments = tokenize(r#"equals(@user.a, "it's", 'say \'hi\'')"#);
        assert_eq!(
            segments,
            vec![
                Segment::Text("equals(@user.a, ".into()),
                Segment::Literal("it's".into()),
                Segment::Text(", ".into()),
                Segment::Literal("say 'hi'".into()),
                Segment::Text(")".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_literal_stays_text() {
        let segments = tokenize("path('/a");
        assert_eq!(
            segments,
            vec![Segment::Text("path(".into()), Segment::Text("'/a".into())]
        );
    }

    #[test]
    fn test_normalize_and_restore() {
        let normalized = normalize_quotes(r#"equals("it's", 'a"b')"#);
        assert!(!normalized.contains('"'));
        assert_eq!(restore_quotes(&normalized), r#"equals('it\'s', 'a"b')"#);
    }

    #[test]
    fn test_backslashes_are_preserved() {
        let rendered = restore_quotes(&quote_literal(r"a\b"));
        assert_eq!(rendered, r"'a\\b'");
        assert_eq!(tokenize(&rendered), vec![Segment::Literal(r"a\b".into())]);
    }
}
