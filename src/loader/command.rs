//! Command parsing for the load DSL.
//!
//! A program is a whitespace-separated token sequence; each token is one
//! command. This module turns a token into a typed [`Command`] that the
//! executor dispatches on. Values keep their quoting until parse time;
//! the executor receives unquoted text.

use crate::error::{Error, Result};
use crate::tree::path::unquote;

/// A sed-style substitution `s/pattern/replacement/flags`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subst {
    pub pattern: String,
    pub replacement: String,
    pub global: bool,
    pub icase: bool,
}

impl Subst {
    /// Applies the substitution to a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] when the pattern does not compile.
    pub(crate) fn apply(&self, value: &str) -> Result<String> {
        let pattern = if self.icase {
            format!("(?i){}", self.pattern)
        } else {
            self.pattern.clone()
        };
        let re = regex::Regex::new(&pattern).map_err(|e| Error::Load {
            command: format!("s/{}/{}/", self.pattern, self.replacement),
            reason: format!("invalid pattern: {e}"),
        })?;
        let out = if self.global {
            re.replace_all(value, self.replacement.as_str())
        } else {
            re.replace(value, self.replacement.as_str())
        };
        Ok(out.into_owned())
    }
}

/// Collection/leaf action written after `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// `:id` — descend into the cargo at this index.
    Id(String),
    /// `:.method(args)` — invoke a named collection operation.
    Method(String, Vec<String>),
    /// `:=v1,v2` — assign the full content.
    Assign(Vec<String>),
    /// `:~pattern` — run the remaining program once per matching key.
    LoopMatch(String),
    /// `:<v` — push one value.
    Push(String),
    /// `:>v` — unshift one value.
    Unshift(String),
    /// `:@` — sort.
    Sort,
    /// `:-id` — delete this index.
    RemoveId(String),
    /// `:-=v` — delete entries whose value equals `v`.
    RemoveValue(String),
    /// `:-~/re/` — delete ids (hash) or values (list) matching.
    RemoveMatch(String),
    /// `:=~s///` — apply a substitution to every entry.
    SubstAll(Subst),
    /// `~` — clear a leaf.
    Clear,
}

/// Leaf sub-action written after the action (or directly after the
/// element name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubAction {
    /// `=v` — store.
    Store(String),
    /// `.=v` — append.
    Append(String),
    /// `=~s///` — substitute in place.
    Subst(Subst),
    /// `=.file(path)` — store the content of a file.
    FromFile(String),
    /// `=.json(path/a/b)` — store a value projected out of a JSON file.
    FromJson(String),
    /// `=.yaml(path/doc#/a/b)` — same for YAML.
    FromYaml(String),
    /// `=.env(NAME)` — store the content of an environment variable.
    FromEnv(String),
    /// `~` after an id — clear the cargo leaf.
    Clear,
}

/// A parsed element command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementCmd {
    pub raw: String,
    pub name: String,
    pub action: Option<Action>,
    pub subaction: Option<SubAction>,
    pub annotation: Option<String>,
}

/// One command of a load program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// `!` — back to the tree root.
    Root,
    /// `-` — pop one level.
    Up,
    /// `/elt` — walk up to the node owning an element.
    Search(String),
    /// Anything else.
    Element(ElementCmd),
}

impl Command {
    /// Parses one token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] carrying the offending token.
    pub(crate) fn parse(token: &str) -> Result<Self> {
        match token {
            "!" => return Ok(Self::Root),
            "-" => return Ok(Self::Up),
            _ => {}
        }
        if let Some(name) = token.strip_prefix('/') {
            if name.is_empty() {
                return Err(Error::Load {
                    command: token.to_string(),
                    reason: "'/' needs an element name".to_string(),
                });
            }
            return Ok(Self::Search(name.to_string()));
        }
        parse_element(token).map(Self::Element)
    }
}

fn load_err(token: &str, reason: impl Into<String>) -> Error {
    Error::Load {
        command: token.to_string(),
        reason: reason.into(),
    }
}

fn parse_element(token: &str) -> Result<ElementCmd> {
    // Split off the annotation: the first '#' outside double quotes.
    let (body, annotation) = split_annotation(token);

    // The element name runs until the first action/subaction marker.
    let mut name_end = body.len();
    let bytes = body.as_bytes();
    let mut in_quotes = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b':' | b'=' | b'~' if !in_quotes => {
                name_end = i;
                break;
            }
            b'.' if !in_quotes && bytes.get(i + 1) == Some(&b'=') => {
                name_end = i;
                break;
            }
            _ => {}
        }
    }
    let name = body[..name_end].to_string();
    if name.is_empty() {
        return Err(load_err(token, "command without an element name"));
    }
    let mut rest = &body[name_end..];

    let mut action = None;
    if let Some(after_colon) = rest.strip_prefix(':') {
        let (parsed, remaining) = parse_action(token, after_colon)?;
        action = Some(parsed);
        rest = remaining;
    } else if rest == "~" {
        action = Some(Action::Clear);
        rest = "";
    }

    let mut subaction = None;
    if !rest.is_empty() {
        subaction = Some(parse_subaction(token, rest)?);
    }

    Ok(ElementCmd {
        raw: token.to_string(),
        name,
        action,
        subaction,
        annotation,
    })
}

fn split_annotation(token: &str) -> (&str, Option<String>) {
    let mut in_quotes = false;
    for (i, c) in token.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => {
                return (&token[..i], Some(unquote(&token[i + 1..])));
            }
            _ => {}
        }
    }
    (token, None)
}

/// Parses the part after `:`. Returns the action and whatever remains
/// for the sub-action (e.g. `hash:key=value`).
fn parse_action<'a>(token: &str, rest: &'a str) -> Result<(Action, &'a str)> {
    if let Some(method_part) = rest.strip_prefix('.') {
        let (method, args, remaining) = parse_method(token, method_part)?;
        return Ok((Action::Method(method, args), remaining));
    }
    if let Some(subst_part) = rest.strip_prefix("=~") {
        return Ok((Action::SubstAll(parse_subst(token, subst_part)?), ""));
    }
    if let Some(values) = rest.strip_prefix('=') {
        return Ok((Action::Assign(split_values(values)), ""));
    }
    if let Some(pattern) = rest.strip_prefix('~') {
        return Ok((Action::LoopMatch(strip_slashes(pattern).to_string()), ""));
    }
    if let Some(pattern) = rest.strip_prefix("-~") {
        return Ok((Action::RemoveMatch(strip_slashes(pattern).to_string()), ""));
    }
    if let Some(value) = rest.strip_prefix("-=") {
        return Ok((Action::RemoveValue(unquote(value)), ""));
    }
    if let Some(id) = rest.strip_prefix('-') {
        return Ok((Action::RemoveId(unquote(id)), ""));
    }
    if let Some(value) = rest.strip_prefix('<') {
        return Ok((Action::Push(unquote(value)), ""));
    }
    if let Some(value) = rest.strip_prefix('>') {
        return Ok((Action::Unshift(unquote(value)), ""));
    }
    if rest == "@" {
        return Ok((Action::Sort, ""));
    }

    // Plain `:id`, possibly followed by a sub-action.
    let (id, remaining) = split_id(rest);
    if id.is_empty() {
        return Err(load_err(token, "':' needs an id"));
    }
    Ok((Action::Id(unquote(id)), remaining))
}

/// Splits `key=value` / `key.=value` / `key~` into the id and the rest.
fn split_id(rest: &str) -> (&str, &str) {
    let bytes = rest.as_bytes();
    let mut in_quotes = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'=' | b'~' if !in_quotes => return (&rest[..i], &rest[i..]),
            b'.' if !in_quotes && bytes.get(i + 1) == Some(&b'=') => {
                return (&rest[..i], &rest[i..]);
            }
            _ => {}
        }
    }
    (rest, "")
}

fn parse_method<'a>(token: &str, rest: &'a str) -> Result<(String, Vec<String>, &'a str)> {
    let open = rest.find('(');
    match open {
        Some(open) => {
            let method = rest[..open].to_string();
            let close = rest.rfind(')').ok_or_else(|| {
                load_err(token, format!("method '{method}' has no closing parenthesis"))
            })?;
            if close < open {
                return Err(load_err(token, "mismatched parentheses"));
            }
            let args = split_values(&rest[open + 1..close]);
            Ok((method, args, &rest[close + 1..]))
        }
        None => {
            if rest.is_empty() {
                return Err(load_err(token, "':.' needs a method name"));
            }
            Ok((rest.to_string(), Vec::new(), ""))
        }
    }
}

fn parse_subaction(token: &str, rest: &str) -> Result<SubAction> {
    if let Some(value) = rest.strip_prefix(".=") {
        return Ok(SubAction::Append(unquote(value)));
    }
    if let Some(subst_part) = rest.strip_prefix("=~") {
        return Ok(SubAction::Subst(parse_subst(token, subst_part)?));
    }
    for (prefix, build) in [
        ("=.file", SubAction::FromFile as fn(String) -> SubAction),
        ("=.json", SubAction::FromJson as fn(String) -> SubAction),
        ("=.yaml", SubAction::FromYaml as fn(String) -> SubAction),
        ("=.env", SubAction::FromEnv as fn(String) -> SubAction),
    ] {
        if let Some(args) = rest.strip_prefix(prefix) {
            let inner = args
                .strip_prefix('(')
                .and_then(|a| a.strip_suffix(')'))
                .ok_or_else(|| load_err(token, format!("{prefix} needs (argument)")))?;
            return Ok(build(unquote(inner)));
        }
    }
    if let Some(value) = rest.strip_prefix('=') {
        return Ok(SubAction::Store(unquote(value)));
    }
    if rest == "~" {
        return Ok(SubAction::Clear);
    }
    Err(load_err(token, format!("cannot parse '{rest}'")))
}

fn parse_subst(token: &str, rest: &str) -> Result<Subst> {
    let body = rest
        .strip_prefix("s/")
        .ok_or_else(|| load_err(token, "substitution must start with s/"))?;
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('/') => current.push('/'),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            '/' => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    if parts.len() != 3 {
        return Err(load_err(token, "substitution needs s/pattern/replacement/"));
    }
    let flags = &parts[2];
    if let Some(bad) = flags.chars().find(|c| *c != 'g' && *c != 'i') {
        return Err(load_err(token, format!("unknown substitution flag '{bad}'")));
    }
    Ok(Subst {
        pattern: parts[0].clone(),
        replacement: parts[1].clone(),
        global: flags.contains('g'),
        icase: flags.contains('i'),
    })
}

/// Comma-splits an argument list, honoring double quotes.
fn split_values(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut values = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => values.push(unquote(&std::mem::take(&mut current))),
            _ => current.push(c),
        }
    }
    values.push(unquote(&current));
    values
}

fn strip_slashes(pattern: &str) -> &str {
    pattern
        .strip_prefix('/')
        .and_then(|p| p.strip_suffix('/'))
        .unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(token: &str) -> ElementCmd {
        match Command::parse(token).unwrap() {
            Command::Element(cmd) => cmd,
            other => panic!("expected element command, got {other:?}"),
        }
    }

    #[test]
    fn test_navigation_commands() {
        assert_eq!(Command::parse("!").unwrap(), Command::Root);
        assert_eq!(Command::parse("-").unwrap(), Command::Up);
        assert_eq!(
            Command::parse("/fqdn").unwrap(),
            Command::Search("fqdn".to_string())
        );
    }

    #[test]
    fn test_bare_element() {
        let cmd = element("std_id");
        assert_eq!(cmd.name, "std_id");
        assert!(cmd.action.is_none());
        assert!(cmd.subaction.is_none());
    }

    #[test]
    fn test_store() {
        let cmd = element("foo=bar");
        assert_eq!(cmd.name, "foo");
        assert_eq!(cmd.subaction, Some(SubAction::Store("bar".to_string())));
    }

    #[test]
    fn test_store_quoted() {
        let cmd = element("foo=\"hello world\"");
        assert_eq!(
            cmd.subaction,
            Some(SubAction::Store("hello world".to_string()))
        );
    }

    #[test]
    fn test_append() {
        let cmd = element("foo.=bar");
        assert_eq!(cmd.name, "foo");
        assert_eq!(cmd.subaction, Some(SubAction::Append("bar".to_string())));
    }

    #[test]
    fn test_clear() {
        let cmd = element("foo~");
        assert_eq!(cmd.action, Some(Action::Clear));
    }

    #[test]
    fn test_id_descend() {
        let cmd = element("std_id:ab");
        assert_eq!(cmd.action, Some(Action::Id("ab".to_string())));
        assert!(cmd.subaction.is_none());
    }

    #[test]
    fn test_id_with_store() {
        let cmd = element("plain_hash:foo=boo");
        assert_eq!(cmd.action, Some(Action::Id("foo".to_string())));
        assert_eq!(cmd.subaction, Some(SubAction::Store("boo".to_string())));
    }

    #[test]
    fn test_quoted_id() {
        let cmd = element("hash_of_nodes:\"foo node\"");
        assert_eq!(cmd.action, Some(Action::Id("foo node".to_string())));
    }

    #[test]
    fn test_assign_list() {
        let cmd = element("bounded_list:=foo,bar,baz");
        assert_eq!(
            cmd.action,
            Some(Action::Assign(vec![
                "foo".to_string(),
                "bar".to_string(),
                "baz".to_string()
            ]))
        );
    }

    #[test]
    fn test_loop_match() {
        let cmd = element("std_id:~/^\\w+$/");
        assert_eq!(cmd.action, Some(Action::LoopMatch("^\\w+$".to_string())));
    }

    #[test]
    fn test_loop_match_empty() {
        let cmd = element("std_id:~");
        assert_eq!(cmd.action, Some(Action::LoopMatch(String::new())));
    }

    #[test]
    fn test_method_with_args() {
        let cmd = element("a_list:.push(a,b,c)");
        assert_eq!(
            cmd.action,
            Some(Action::Method(
                "push".to_string(),
                vec!["a".to_string(), "b".to_string(), "c".to_string()]
            ))
        );
    }

    #[test]
    fn test_method_without_args() {
        let cmd = element("a_list:.sort");
        assert_eq!(cmd.action, Some(Action::Method("sort".to_string(), vec![])));
    }

    #[test]
    fn test_remove_variants() {
        assert_eq!(
            element("h:-foo").action,
            Some(Action::RemoveId("foo".to_string()))
        );
        assert_eq!(
            element("l:-=bar").action,
            Some(Action::RemoveValue("bar".to_string()))
        );
        assert_eq!(
            element("h:-~/^x/").action,
            Some(Action::RemoveMatch("^x".to_string()))
        );
    }

    #[test]
    fn test_push_unshift_sort() {
        assert_eq!(element("l:<v").action, Some(Action::Push("v".to_string())));
        assert_eq!(
            element("l:>v").action,
            Some(Action::Unshift("v".to_string()))
        );
        assert_eq!(element("l:@").action, Some(Action::Sort));
    }

    #[test]
    fn test_substitution() {
        let cmd = element("foo=~s/bar/baz/gi");
        match cmd.subaction {
            Some(SubAction::Subst(s)) => {
                assert_eq!(s.pattern, "bar");
                assert_eq!(s.replacement, "baz");
                assert!(s.global);
                assert!(s.icase);
            }
            other => panic!("expected substitution, got {other:?}"),
        }
    }

    #[test]
    fn test_substitution_escaped_delimiter() {
        let cmd = element("foo=~s/a\\/b/c/");
        match cmd.subaction {
            Some(SubAction::Subst(s)) => assert_eq!(s.pattern, "a/b"),
            other => panic!("expected substitution, got {other:?}"),
        }
    }

    #[test]
    fn test_collection_substitute_all() {
        let cmd = element("h:=~s/foo/bar/");
        assert!(matches!(cmd.action, Some(Action::SubstAll(_))));
    }

    #[test]
    fn test_data_sources() {
        assert_eq!(
            element("f=.file(notes.txt)").subaction,
            Some(SubAction::FromFile("notes.txt".to_string()))
        );
        assert_eq!(
            element("f=.json(conf.json/a/b)").subaction,
            Some(SubAction::FromJson("conf.json/a/b".to_string()))
        );
        assert_eq!(
            element("f=.yaml(conf.yaml/0#/a)").subaction,
            Some(SubAction::FromYaml("conf.yaml/0#/a".to_string()))
        );
        assert_eq!(
            element("f=.env(HOME)").subaction,
            Some(SubAction::FromEnv("HOME".to_string()))
        );
    }

    #[test]
    fn test_annotation() {
        let cmd = element("foo=bar#a comment");
        assert_eq!(cmd.subaction, Some(SubAction::Store("bar".to_string())));
        assert_eq!(cmd.annotation, Some("a comment".to_string()));
    }

    #[test]
    fn test_quoted_annotation() {
        let cmd = element("foo#\"quoted note\"");
        assert_eq!(cmd.annotation, Some("quoted note".to_string()));
    }

    #[test]
    fn test_hash_inside_quotes_is_not_annotation() {
        let cmd = element("foo=\"a#b\"");
        assert_eq!(cmd.subaction, Some(SubAction::Store("a#b".to_string())));
        assert!(cmd.annotation.is_none());
    }

    #[test]
    fn test_subst_apply() {
        let s = Subst {
            pattern: "o".to_string(),
            replacement: "0".to_string(),
            global: false,
            icase: false,
        };
        assert_eq!(s.apply("foo").unwrap(), "f0o");
        let s = Subst {
            global: true,
            ..s
        };
        assert_eq!(s.apply("foo").unwrap(), "f00");
    }

    #[test]
    fn test_bad_commands() {
        assert!(Command::parse("/").is_err());
        assert!(Command::parse("=foo").is_err());
        assert!(Command::parse("f=~s/only-two/").is_err());
        assert!(Command::parse("f=~s/a/b/x").is_err());
        assert!(Command::parse("l:.push(a").is_err());
    }
}
