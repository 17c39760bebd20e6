//! Tree paths.
//!
//! Paths address items relative to a starting point using the same step
//! vocabulary as the command DSL: `!` (root), `-` (up), `name`
//! (element), `name:key` (collection entry). They are used by the change
//! log, the per-path error map, `refer_to`, compute variables and
//! [`Instance::grab`](crate::Instance::grab).

use crate::error::{Error, Result};

/// One step of a tree path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Jump to the tree root.
    Root,
    /// Move to the parent node.
    Up,
    /// Descend into a named element.
    Element(String),
    /// Descend into a collection entry: element name plus index.
    ElementId(String, String),
}

/// Parses a whitespace-separated path.
///
/// Keys containing spaces use double quotes: `hash:"a key" leaf`.
///
/// # Errors
///
/// Returns [`Error::Load`] for empty steps or unbalanced quotes.
///
/// # Examples
///
/// ```
/// use arbor::tree::{parse_path, PathStep};
///
/// let steps = parse_path("! plain_hash:foo").unwrap();
/// assert_eq!(steps[0], PathStep::Root);
/// assert_eq!(
///     steps[1],
///     PathStep::ElementId("plain_hash".to_string(), "foo".to_string())
/// );
/// ```
pub fn parse_path(text: &str) -> Result<Vec<PathStep>> {
    let mut steps = Vec::new();
    for token in split_tokens(text)? {
        let step = match token.as_str() {
            "!" => PathStep::Root,
            "-" => PathStep::Up,
            _ => match token.split_once(':') {
                Some((name, key)) if !name.is_empty() => {
                    PathStep::ElementId(name.to_string(), unquote(key))
                }
                _ => PathStep::Element(token),
            },
        };
        steps.push(step);
    }
    Ok(steps)
}

/// Splits on whitespace while keeping double-quoted runs intact.
pub(crate) fn split_tokens(text: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if in_quotes {
        return Err(Error::Load {
            command: text.to_string(),
            reason: "unbalanced double quote".to_string(),
        });
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Strips surrounding double quotes and resolves the escapes the DSL
/// recognizes inside them: `\"`, `\\` and the literal two-character
/// sequence `\n` (newline).
#[must_use]
pub(crate) fn unquote(text: &str) -> String {
    let inner = match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) if text.len() >= 2 => inner,
        _ => return text.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Quotes a value for DSL output when it contains characters that would
/// break tokenization.
#[must_use]
pub(crate) fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '#');
    if !needs_quotes {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_path() {
        let steps = parse_path("- hosts fqdn").unwrap();
        assert_eq!(
            steps,
            vec![
                PathStep::Up,
                PathStep::Element("hosts".to_string()),
                PathStep::Element("fqdn".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_element_id() {
        let steps = parse_path("hash:key").unwrap();
        assert_eq!(
            steps,
            vec![PathStep::ElementId("hash".to_string(), "key".to_string())]
        );
    }

    #[test]
    fn test_parse_quoted_key() {
        let steps = parse_path("hash:\"a key\"").unwrap();
        assert_eq!(
            steps,
            vec![PathStep::ElementId("hash".to_string(), "a key".to_string())]
        );
    }

    #[test]
    fn test_split_keeps_quoted_runs() {
        let tokens = split_tokens("a \"b c\" d").unwrap();
        assert_eq!(tokens, vec!["a", "\"b c\"", "d"]);
    }

    #[test]
    fn test_split_unbalanced_quote() {
        assert!(split_tokens("a \"b").is_err());
    }

    #[test]
    fn test_unquote_escapes() {
        assert_eq!(unquote("\"a \\\"b\\\" c\""), "a \"b\" c");
        assert_eq!(unquote("\"line\\nbreak\""), "line\nbreak");
        assert_eq!(unquote("\"back\\\\slash\""), "back\\slash");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_quote_round_trip() {
        for value in ["plain", "with space", "with \"quote\"", "line\nbreak", ""] {
            assert_eq!(unquote(&quote(value)), value);
        }
    }

    #[test]
    fn test_quote_plain_stays_plain() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("with space"), "\"with space\"");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Quoting then unquoting is the identity for any value the DSL
        /// can carry.
        #[test]
        fn prop_quote_unquote_round_trip(value in "[ -~\\n]{0,40}") {
            prop_assert_eq!(unquote(&quote(&value)), value);
        }
    }

    proptest! {
        /// A quoted token survives tokenization as a single token.
        #[test]
        fn prop_quoted_token_stays_whole(value in "[a-z ]{1,30}") {
            let quoted = quote(&value);
            let program = format!("before {quoted} after");
            let tokens = split_tokens(&program).unwrap();
            prop_assert_eq!(tokens.len(), 3);
            prop_assert_eq!(unquote(&tokens[1]), value);
        }
    }

    proptest! {
        /// Tokenization never loses non-whitespace input.
        #[test]
        fn prop_tokens_cover_input(program in "[a-z=:,. ]{0,60}") {
            let tokens = split_tokens(&program).unwrap();
            let joined: usize = tokens.iter().map(String::len).sum();
            let expected = program.chars().filter(|c| !c.is_whitespace()).count();
            prop_assert_eq!(joined, expected);
        }
    }
}
