//! PEG-like value grammars.
//!
//! A leaf schema may carry a small grammar instead of (or in addition to)
//! a match regex. The grammar is compiled from a compact textual rule set
//! at schema build time and run against the full candidate value: the
//! whole input must be consumed for the value to be accepted.
//!
//! Rule syntax, one rule per line:
//!
//! ```text
//! start: item ( ',' item )*        # not supported: groups — expand rules
//! start: item tail*
//! tail: ',' item
//! item: /[a-z]+/ | '0'
//! loud: /[A-Z]+/ => warn "all caps"
//! ```
//!
//! The first rule is the start rule. Alternatives are ordered (first
//! match wins) and repetition is greedy without backtracking, as in a
//! parsing expression grammar. An alternative may carry a warning that is
//! reported when that alternative produced the match.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;

/// Repetition marker on a grammar term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rep {
    One,
    Opt,
    Star,
    Plus,
}

/// A single matching atom.
#[derive(Debug, Clone)]
enum Atom {
    /// Literal text, from 'quoted' or "quoted" tokens.
    Literal(String),
    /// Reference to another rule.
    Rule(String),
    /// Anchored regex, from /slash-delimited/ tokens.
    Pattern(Regex),
}

#[derive(Debug, Clone)]
struct Term {
    atom: Atom,
    rep: Rep,
}

/// One alternative of a rule: a term sequence plus an optional warning
/// emitted when the alternative matches.
#[derive(Debug, Clone)]
struct Alternative {
    terms: Vec<Term>,
    warn: Option<String>,
}

/// A compiled grammar: named rules, the first one being the start rule.
///
/// # Examples
///
/// ```
/// use arbor::schema::Grammar;
///
/// let grammar = Grammar::compile(
///     "list: word tail*\n\
///      tail: ',' word\n\
///      word: /[a-z]+/",
/// )
/// .unwrap();
///
/// assert!(grammar.check("foo,bar,baz").unwrap().is_empty());
/// assert!(grammar.check("foo,,bar").is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: BTreeMap<String, Vec<Alternative>>,
    start: String,
}

impl Grammar {
    /// Compiles a grammar from its textual rule set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] on syntax errors, unknown rule
    /// references, invalid embedded regexes, or an empty rule set.
    pub fn compile(text: &str) -> Result<Self> {
        let mut rules: BTreeMap<String, Vec<Alternative>> = BTreeMap::new();
        let mut start = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (name, body) = line.split_once(':').ok_or_else(|| {
                Error::model(format!("grammar rule without ':' separator: {line}"))
            })?;
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::model(format!("invalid grammar rule name: {name}")));
            }
            if rules.contains_key(name) {
                return Err(Error::model(format!("duplicate grammar rule: {name}")));
            }
            let alternatives = parse_alternatives(body)?;
            if start.is_none() {
                start = Some(name.to_string());
            }
            rules.insert(name.to_string(), alternatives);
        }

        let start = start.ok_or_else(|| Error::model("empty grammar"))?;

        // Every rule reference must resolve.
        for (name, alternatives) in &rules {
            for alt in alternatives {
                for term in &alt.terms {
                    if let Atom::Rule(ref target) = term.atom {
                        if !rules.contains_key(target) {
                            return Err(Error::model(format!(
                                "grammar rule '{name}' references unknown rule '{target}'"
                            )));
                        }
                    }
                }
            }
        }

        Ok(Self { rules, start })
    }

    /// Checks a candidate value against the grammar.
    ///
    /// The full input must match. On success, returns the warnings
    /// collected from matched alternatives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] (with an empty path, filled in by the
    /// caller) when the input is rejected.
    pub fn check(&self, input: &str) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        match self.match_rule(&self.start, input, 0, &mut warnings, 0)? {
            Some(end) if end == input.len() => Ok(warnings),
            Some(end) => Err(Error::WrongValue {
                path: String::new(),
                reason: format!("grammar matched only {end} of {} bytes", input.len()),
            }),
            None => Err(Error::WrongValue {
                path: String::new(),
                reason: format!("value '{input}' rejected by grammar rule '{}'", self.start),
            }),
        }
    }

    fn match_rule(
        &self,
        name: &str,
        input: &str,
        pos: usize,
        warnings: &mut Vec<String>,
        depth: usize,
    ) -> Result<Option<usize>> {
        if depth > 64 {
            return Err(Error::model(format!(
                "grammar recursion limit exceeded in rule '{name}'"
            )));
        }
        let alternatives = self
            .rules
            .get(name)
            .ok_or_else(|| Error::internal(format!("unresolved grammar rule '{name}'")))?;

        for alt in alternatives {
            let before = warnings.len();
            if let Some(end) = self.match_sequence(&alt.terms, input, pos, warnings, depth)? {
                if let Some(ref msg) = alt.warn {
                    warnings.push(msg.clone());
                }
                return Ok(Some(end));
            }
            warnings.truncate(before);
        }
        Ok(None)
    }

    fn match_sequence(
        &self,
        terms: &[Term],
        input: &str,
        mut pos: usize,
        warnings: &mut Vec<String>,
        depth: usize,
    ) -> Result<Option<usize>> {
        for term in terms {
            match term.rep {
                Rep::One => match self.match_atom(&term.atom, input, pos, warnings, depth)? {
                    Some(end) => pos = end,
                    None => return Ok(None),
                },
                Rep::Opt => {
                    if let Some(end) = self.match_atom(&term.atom, input, pos, warnings, depth)? {
                        pos = end;
                    }
                }
                Rep::Star | Rep::Plus => {
                    let mut count = 0usize;
                    while let Some(end) = self.match_atom(&term.atom, input, pos, warnings, depth)?
                    {
                        if end == pos {
                            break; // zero-width match would loop forever
                        }
                        pos = end;
                        count += 1;
                    }
                    if term.rep == Rep::Plus && count == 0 {
                        return Ok(None);
                    }
                }
            }
        }
        Ok(Some(pos))
    }

    fn match_atom(
        &self,
        atom: &Atom,
        input: &str,
        pos: usize,
        warnings: &mut Vec<String>,
        depth: usize,
    ) -> Result<Option<usize>> {
        match atom {
            Atom::Literal(lit) => {
                if input[pos..].starts_with(lit.as_str()) {
                    Ok(Some(pos + lit.len()))
                } else {
                    Ok(None)
                }
            }
            Atom::Pattern(re) => Ok(re.find(&input[pos..]).map(|m| pos + m.end())),
            Atom::Rule(name) => self.match_rule(name, input, pos, warnings, depth + 1),
        }
    }
}

fn parse_alternatives(body: &str) -> Result<Vec<Alternative>> {
    let mut alternatives = Vec::new();
    for alt_text in split_alternatives(body) {
        let alt_text = alt_text.trim();
        let (terms_text, warn) = match alt_text.split_once("=>") {
            Some((t, rest)) => {
                let rest = rest.trim();
                let msg = rest
                    .strip_prefix("warn")
                    .map(str::trim)
                    .and_then(|m| m.strip_prefix('"'))
                    .and_then(|m| m.strip_suffix('"'))
                    .ok_or_else(|| {
                        Error::model(format!("expected => warn \"msg\", got: {rest}"))
                    })?;
                (t, Some(msg.to_string()))
            }
            None => (alt_text, None),
        };
        alternatives.push(Alternative {
            terms: parse_terms(terms_text)?,
            warn,
        });
    }
    if alternatives.is_empty() {
        return Err(Error::model("grammar rule with no alternatives"));
    }
    Ok(alternatives)
}

/// Split on `|` outside of quoted and slash-delimited tokens.
fn split_alternatives(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut delim: Option<char> = None;
    for c in body.chars() {
        match delim {
            Some(d) => {
                current.push(c);
                if c == d {
                    delim = None;
                }
            }
            None => match c {
                '\'' | '"' | '/' => {
                    delim = Some(c);
                    current.push(c);
                }
                '|' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
    }
    parts.push(current);
    parts
}

fn parse_terms(text: &str) -> Result<Vec<Term>> {
    let mut terms = Vec::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let atom = match c {
            '\'' | '"' => {
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == c => break,
                        Some(ch) => lit.push(ch),
                        None => {
                            return Err(Error::model(format!(
                                "unterminated literal in grammar: {text}"
                            )))
                        }
                    }
                }
                Atom::Literal(lit)
            }
            '/' => {
                chars.next();
                let mut raw = String::new();
                loop {
                    match chars.next() {
                        Some('/') => break,
                        Some(ch) => raw.push(ch),
                        None => {
                            return Err(Error::model(format!(
                                "unterminated pattern in grammar: {text}"
                            )))
                        }
                    }
                }
                let re = Regex::new(&format!("^(?:{raw})"))
                    .map_err(|e| Error::model(format!("invalid grammar pattern /{raw}/: {e}")))?;
                Atom::Pattern(re)
            }
            _ => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(Error::model(format!(
                        "unexpected character '{c}' in grammar rule body: {text}"
                    )));
                }
                Atom::Rule(name)
            }
        };
        let rep = match chars.peek() {
            Some('?') => {
                chars.next();
                Rep::Opt
            }
            Some('*') => {
                chars.next();
                Rep::Star
            }
            Some('+') => {
                chars.next();
                Rep::Plus
            }
            _ => Rep::One,
        };
        terms.push(Term { atom, rep });
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_grammar() -> Grammar {
        Grammar::compile(
            "list: word tail*\n\
             tail: ',' word\n\
             word: /[a-z]+/",
        )
        .unwrap()
    }

    #[test]
    fn test_accepts_full_match() {
        let g = list_grammar();
        assert!(g.check("foo").unwrap().is_empty());
        assert!(g.check("foo,bar,baz").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_partial_match() {
        let g = list_grammar();
        assert!(g.check("foo,").is_err());
        assert!(g.check("foo,,bar").is_err());
        assert!(g.check("FOO").is_err());
        assert!(g.check("").is_err());
    }

    #[test]
    fn test_ordered_alternatives() {
        let g = Grammar::compile("v: 'yes' | 'y' | /[0-9]+/").unwrap();
        assert!(g.check("yes").is_ok());
        assert!(g.check("y").is_ok());
        assert!(g.check("42").is_ok());
        assert!(g.check("no").is_err());
    }

    #[test]
    fn test_warning_alternative() {
        let g = Grammar::compile("v: /[a-z]+/ | /[A-Z]+/ => warn \"all caps\"").unwrap();
        assert!(g.check("quiet").unwrap().is_empty());
        let warnings = g.check("LOUD").unwrap();
        assert_eq!(warnings, vec!["all caps".to_string()]);
    }

    #[test]
    fn test_optional_and_plus() {
        let g = Grammar::compile("num: '-'? /[0-9]/+").unwrap();
        assert!(g.check("-12").is_ok());
        assert!(g.check("12").is_ok());
        assert!(g.check("-").is_err());
    }

    #[test]
    fn test_unknown_rule_reference() {
        let err = Grammar::compile("a: b").unwrap_err();
        assert!(format!("{err}").contains("unknown rule"));
    }

    #[test]
    fn test_duplicate_rule() {
        assert!(Grammar::compile("a: 'x'\na: 'y'").is_err());
    }

    #[test]
    fn test_empty_grammar() {
        assert!(Grammar::compile("  \n# comment only\n").is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Grammar::compile("a: /[unclosed/").is_err());
    }

    #[test]
    fn test_pipe_inside_pattern() {
        let g = Grammar::compile("a: /x|y/").unwrap();
        assert!(g.check("x").is_ok());
        assert!(g.check("y").is_ok());
    }
}
