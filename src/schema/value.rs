//! Leaf schema: the typed value specification.
//!
//! A [`ValueSpec`] describes everything a leaf may hold: its type, bounds,
//! enum choices, validation regexes and grammars, warning and assertion
//! rules with optional auto-fixes, replace tables, computed and migrated
//! content, and layered defaults. Specs are immutable once built; the
//! builder performs the model consistency checks and returns
//! [`Error::Model`](crate::Error) for schemas that cannot work.

use crate::error::{Error, Result};
use crate::schema::grammar::Grammar;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Code assertion over a pending value: true means the rule holds.
pub type AssertFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Repair closure: takes the offending value, returns the fixed one.
pub type FixFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// The type of content a leaf may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Canonical `"0"`/`"1"`, normalized from the usual spellings on store.
    Boolean,
    /// One of a fixed ordered set of strings.
    Enum,
    /// A signed integer.
    Integer,
    /// A floating-point number.
    Number,
    /// Free text without newlines.
    Uniline,
    /// Free text.
    String,
    /// A key of another collection in the tree (see `refer_to`).
    Reference,
    /// A filesystem path expected to name a plain file.
    File,
    /// A filesystem path expected to name a directory.
    Dir,
}

impl ValueType {
    /// Whether min/max bounds make sense for this type.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }

    /// Whether a match regex makes sense for this type.
    #[must_use]
    pub const fn is_matchable(self) -> bool {
        matches!(self, Self::String | Self::Uniline | Self::Enum)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Enum => "enum",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Uniline => "uniline",
            Self::String => "string",
            Self::Reference => "reference",
            Self::File => "file",
            Self::Dir => "dir",
        };
        write!(f, "{name}")
    }
}

/// Case conversion applied to stored content (or collection keys).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseConvert {
    /// Lowercase.
    Lc,
    /// Uppercase.
    Uc,
}

impl CaseConvert {
    /// Applies the conversion.
    #[must_use]
    pub fn apply(self, value: &str) -> String {
        match self {
            Self::Lc => value.to_lowercase(),
            Self::Uc => value.to_uppercase(),
        }
    }
}

/// A regex-triggered warning rule, optionally carrying a fix.
#[derive(Clone)]
pub struct RegexRule {
    /// The trigger pattern.
    pub pattern: Regex,
    /// Message shown instead of the generated one.
    pub msg: Option<String>,
    /// Repair closure applied by `apply_fixes`.
    pub fix: Option<FixFn>,
}

impl fmt::Debug for RegexRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexRule")
            .field("pattern", &self.pattern.as_str())
            .field("msg", &self.msg)
            .field("fix", &self.fix.is_some())
            .finish()
    }
}

/// A labelled code rule: assertion or conditional warning.
#[derive(Clone)]
pub struct CodeRule {
    /// Label used in messages.
    pub label: String,
    /// The predicate over the pending value.
    pub code: AssertFn,
    /// Message shown instead of the label.
    pub msg: Option<String>,
    /// Repair closure applied by `apply_fixes`.
    pub fix: Option<FixFn>,
}

impl fmt::Debug for CodeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRule")
            .field("label", &self.label)
            .field("msg", &self.msg)
            .field("fix", &self.fix.is_some())
            .finish()
    }
}

/// A replace-table entry: literal or regex pattern mapped to a canonical
/// value. Literal equality is tried before the full-string regex.
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    raw: String,
    regex: Regex,
    to: String,
}

impl ReplaceRule {
    fn matches(&self, value: &str) -> bool {
        self.raw == value || self.regex.is_match(value)
    }
}

/// Formula specification for `compute` and `migrate_from`.
///
/// The formula is a `$var` template; each variable binds to a tree path.
/// With `use_eval` the substituted text is additionally evaluated as an
/// integer arithmetic expression.
#[derive(Debug, Clone, Default)]
pub struct ComputeSpec {
    /// The `$var` template.
    pub formula: String,
    /// Variable name to tree path bindings.
    pub variables: Vec<(String, String)>,
    /// Replace table applied to each substituted variable value.
    pub replace: BTreeMap<String, String>,
    /// Evaluate the substituted text as integer arithmetic.
    pub use_eval: bool,
    /// Whether a user store may override the computed result.
    pub allow_override: bool,
}

impl ComputeSpec {
    /// Creates a compute spec from a formula and variable bindings.
    #[must_use]
    pub fn new(formula: &str, variables: &[(&str, &str)]) -> Self {
        Self {
            formula: formula.to_string(),
            variables: variables
                .iter()
                .map(|(v, p)| ((*v).to_string(), (*p).to_string()))
                .collect(),
            ..Default::default()
        }
    }

    /// Enables arithmetic evaluation of the substituted formula.
    #[must_use]
    pub fn with_eval(mut self) -> Self {
        self.use_eval = true;
        self
    }

    /// Allows user stores to override the computed result.
    #[must_use]
    pub fn with_override(mut self) -> Self {
        self.allow_override = true;
        self
    }

    /// Adds a replace-table entry applied to substituted variable values.
    #[must_use]
    pub fn with_replace(mut self, from: &str, to: &str) -> Self {
        self.replace.insert(from.to_string(), to.to_string());
        self
    }

    /// Substitutes resolved variable values into the formula.
    ///
    /// Both `$var` and `${var}` spellings are recognized. A variable whose
    /// path resolved to nothing substitutes the empty string.
    #[must_use]
    pub fn substitute(&self, values: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(self.formula.len());
        let mut chars = self.formula.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }
            let mut name = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if braced {
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            let resolved = values.get(&name).map(std::string::String::as_str).unwrap_or("");
            let replaced = self
                .replace
                .get(resolved)
                .map_or(resolved, std::string::String::as_str);
            out.push_str(replaced);
        }
        out
    }
}

/// Evaluates an integer arithmetic expression (`+ - * /`, parentheses,
/// unary minus).
///
/// # Errors
///
/// Returns [`Error::WrongValue`] for malformed expressions or division by
/// zero.
pub fn eval_arith(text: &str) -> Result<i64> {
    let mut parser = ArithParser {
        input: text.as_bytes(),
        pos: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos != parser.input.len() {
        return Err(arith_err(text, "trailing characters"));
    }
    Ok(value)
}

fn arith_err(text: &str, reason: &str) -> Error {
    Error::WrongValue {
        path: String::new(),
        reason: format!("cannot evaluate '{text}': {reason}"),
    }
}

struct ArithParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl ArithParser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<i64> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    acc = acc.wrapping_add(self.term()?);
                }
                Some(b'-') => {
                    self.pos += 1;
                    acc = acc.wrapping_sub(self.term()?);
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<i64> {
        let mut acc = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    acc = acc.wrapping_mul(self.factor()?);
                }
                Some(b'/') => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    if rhs == 0 {
                        return Err(arith_err(
                            std::str::from_utf8(self.input).unwrap_or(""),
                            "division by zero",
                        ));
                    }
                    acc /= rhs;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn factor(&mut self) -> Result<i64> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() == Some(b')') {
                    self.pos += 1;
                    Ok(value)
                } else {
                    Err(arith_err(
                        std::str::from_utf8(self.input).unwrap_or(""),
                        "missing closing parenthesis",
                    ))
                }
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self
                    .input
                    .get(self.pos)
                    .is_some_and(u8::is_ascii_digit)
                {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.input[start..self.pos])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        arith_err(
                            std::str::from_utf8(self.input).unwrap_or(""),
                            "integer overflow",
                        )
                    })
            }
            _ => Err(arith_err(
                std::str::from_utf8(self.input).unwrap_or(""),
                "expected number",
            )),
        }
    }
}

/// Outcome of running a value through the validation pipeline.
#[derive(Default)]
pub struct CheckReport {
    /// Hard validation failures.
    pub errors: Vec<String>,
    /// Warnings; these never abort.
    pub warnings: Vec<String>,
    /// Fixes available for violated rules, paired with their message.
    pub fixes: Vec<(String, FixFn)>,
}

impl CheckReport {
    /// Whether validation passed (warnings do not fail a check).
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of available fixes.
    #[must_use]
    pub fn fix_count(&self) -> usize {
        self.fixes.len()
    }
}

impl fmt::Debug for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckReport")
            .field("errors", &self.errors)
            .field("warnings", &self.warnings)
            .field("fixes", &self.fixes.len())
            .finish()
    }
}

/// Context the validation pipeline needs from the live tree.
#[derive(Debug, Default)]
pub struct CheckContext {
    /// Live choice set resolved from `refer_to`, for reference leaves.
    pub refer_choices: Option<Vec<String>>,
    /// Instance root directory, for file/dir existence warnings.
    pub root_dir: Option<std::path::PathBuf>,
}

/// The immutable schema of one leaf.
///
/// Built through [`ValueSpec::builder`]; the builder performs the model
/// consistency checks.
///
/// # Examples
///
/// ```
/// use arbor::schema::{ValueSpec, ValueType};
///
/// let spec = ValueSpec::builder(ValueType::Enum)
///     .choice(&["A", "B", "C"])
///     .default_value("A")
///     .build()
///     .unwrap();
/// assert_eq!(spec.default.as_deref(), Some("A"));
/// ```
#[derive(Debug, Clone)]
pub struct ValueSpec {
    /// The leaf type.
    pub value_type: ValueType,
    /// Lower bound (integer/number only).
    pub min: Option<f64>,
    /// Upper bound (integer/number only).
    pub max: Option<f64>,
    /// Ordered enum choices.
    pub choice: Vec<String>,
    choice_set: HashSet<String>,
    /// Boolean spellings written back on fetch: `[false, true]`.
    pub write_as: Option<[String; 2]>,
    /// Schema default (precedence below layered).
    pub default: Option<String>,
    /// Upstream default; never written back by the producing backend.
    pub upstream_default: Option<String>,
    /// Whether an empty resolved value is a read-time error.
    pub mandatory: bool,
    /// Full validation regex.
    pub match_regex: Option<Regex>,
    /// Full-input grammar.
    pub grammar: Option<Grammar>,
    /// Warn (and optionally fix) when the pattern matches.
    pub warn_if_match: Vec<RegexRule>,
    /// Warn (and optionally fix) unless the pattern matches.
    pub warn_unless_match: Vec<RegexRule>,
    /// Reject when the predicate is false.
    pub assert_rules: Vec<CodeRule>,
    /// Warn when the predicate is true.
    pub warn_if: Vec<CodeRule>,
    /// Warn when the predicate is false.
    pub warn_unless: Vec<CodeRule>,
    /// Unconditional warning on store.
    pub warn: Option<String>,
    /// Case conversion applied on store.
    pub convert: Option<CaseConvert>,
    /// Replace table applied before validation.
    pub replace: Vec<ReplaceRule>,
    /// Path to an external hash used as a replacement map on fetch.
    pub replace_follow: Option<String>,
    /// Computed content.
    pub compute: Option<ComputeSpec>,
    /// One-shot migration after initial load.
    pub migrate_from: Option<ComputeSpec>,
    /// Help texts: compiled pattern, original pattern, text.
    help: Vec<(Regex, String, String)>,
    /// Choice source path for reference leaves.
    pub refer_to: Option<String>,
    /// Formula-templated choice source path.
    pub computed_refer_to: Option<ComputeSpec>,
}

impl ValueSpec {
    /// Starts building a leaf spec of the given type.
    #[must_use]
    pub fn builder(value_type: ValueType) -> ValueSpecBuilder {
        ValueSpecBuilder::new(value_type)
    }

    /// O(1) membership test against the enum choice set.
    #[must_use]
    pub fn has_choice(&self, value: &str) -> bool {
        self.choice_set.contains(value)
    }

    /// Resolves the help text for a given content.
    ///
    /// Patterns are tried longest-first; `"."` and `".*"` act as
    /// fallbacks tried last.
    #[must_use]
    pub fn help_for(&self, content: &str) -> Option<&str> {
        for (re, _raw, text) in &self.help {
            if re.is_match(content) {
                return Some(text);
            }
        }
        None
    }

    /// Normalizes the usual boolean spellings to canonical `"0"`/`"1"`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] for unrecognized spellings.
    pub fn normalize_boolean(&self, value: &str) -> Result<String> {
        if let Some([false_str, true_str]) = &self.write_as {
            if value == true_str {
                return Ok("1".to_string());
            }
            if value == false_str {
                return Ok("0".to_string());
            }
        }
        match value.to_lowercase().as_str() {
            "y" | "yes" | "true" | "on" | "1" => Ok("1".to_string()),
            "n" | "no" | "false" | "off" | "0" | "" => Ok("0".to_string()),
            _ => Err(Error::WrongValue {
                path: String::new(),
                reason: format!("'{value}' is not a boolean"),
            }),
        }
    }

    /// Applies the store-time transformation chain: case conversion,
    /// boolean normalization, then the replace table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WrongValue`] when boolean normalization rejects
    /// the input.
    pub fn transform(&self, value: &str) -> Result<String> {
        let mut out = match self.convert {
            Some(convert) => convert.apply(value),
            None => value.to_string(),
        };
        if self.value_type == ValueType::Boolean {
            out = self.normalize_boolean(&out)?;
        }
        for rule in &self.replace {
            if rule.matches(&out) {
                out = rule.to.clone();
                break;
            }
        }
        Ok(out)
    }

    /// Runs the full validation pipeline over a candidate value.
    ///
    /// Stage order: type, bounds, match regex, grammar, regex warning
    /// sets, code rules, unconditional warn. Errors and warnings
    /// accumulate in the report; available fixes are collected for
    /// `apply_fixes`.
    #[must_use]
    pub fn check_value(&self, value: &str, ctx: &CheckContext) -> CheckReport {
        let mut report = CheckReport::default();

        self.check_type(value, ctx, &mut report);
        self.check_bounds(value, &mut report);

        if let Some(ref re) = self.match_regex {
            if !re.is_match(value) {
                report
                    .errors
                    .push(format!("value '{value}' does not match /{}/", re.as_str()));
            }
        }

        if let Some(ref grammar) = self.grammar {
            match grammar.check(value) {
                Ok(warnings) => report.warnings.extend(warnings),
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        for rule in &self.warn_if_match {
            if rule.pattern.is_match(value) {
                let msg = rule.msg.clone().unwrap_or_else(|| {
                    format!("value '{value}' should not match /{}/", rule.pattern.as_str())
                });
                if let Some(ref fix) = rule.fix {
                    report.fixes.push((msg.clone(), Arc::clone(fix)));
                }
                report.warnings.push(msg);
            }
        }
        for rule in &self.warn_unless_match {
            if !rule.pattern.is_match(value) {
                let msg = rule.msg.clone().unwrap_or_else(|| {
                    format!("value '{value}' should match /{}/", rule.pattern.as_str())
                });
                if let Some(ref fix) = rule.fix {
                    report.fixes.push((msg.clone(), Arc::clone(fix)));
                }
                report.warnings.push(msg);
            }
        }

        for rule in &self.assert_rules {
            if !(rule.code)(value) {
                let msg = rule
                    .msg
                    .clone()
                    .unwrap_or_else(|| format!("assertion '{}' failed", rule.label));
                if let Some(ref fix) = rule.fix {
                    report.fixes.push((msg.clone(), Arc::clone(fix)));
                }
                report.errors.push(msg);
            }
        }
        for rule in &self.warn_if {
            if (rule.code)(value) {
                let msg = rule
                    .msg
                    .clone()
                    .unwrap_or_else(|| format!("warning condition '{}' met", rule.label));
                if let Some(ref fix) = rule.fix {
                    report.fixes.push((msg.clone(), Arc::clone(fix)));
                }
                report.warnings.push(msg);
            }
        }
        for rule in &self.warn_unless {
            if !(rule.code)(value) {
                let msg = rule
                    .msg
                    .clone()
                    .unwrap_or_else(|| format!("condition '{}' not met", rule.label));
                if let Some(ref fix) = rule.fix {
                    report.fixes.push((msg.clone(), Arc::clone(fix)));
                }
                report.warnings.push(msg);
            }
        }

        if let Some(ref msg) = self.warn {
            report.warnings.push(msg.clone());
        }

        report
    }

    fn check_type(&self, value: &str, ctx: &CheckContext, report: &mut CheckReport) {
        match self.value_type {
            ValueType::Boolean => {
                if value != "0" && value != "1" {
                    report
                        .errors
                        .push(format!("'{value}' is not a canonical boolean"));
                }
            }
            ValueType::Enum => {
                if !self.has_choice(value) {
                    report.errors.push(format!(
                        "value '{value}' is not of choice {}",
                        self.choice.join(",")
                    ));
                }
            }
            ValueType::Integer => {
                if value.parse::<i64>().is_err() {
                    report
                        .errors
                        .push(format!("value '{value}' is not an integer"));
                }
            }
            ValueType::Number => {
                if value.parse::<f64>().is_err() {
                    report
                        .errors
                        .push(format!("value '{value}' is not a number"));
                }
            }
            ValueType::Uniline => {
                if value.contains('\n') {
                    report
                        .errors
                        .push("uniline value cannot contain newline".to_string());
                }
            }
            ValueType::String => {}
            ValueType::Reference => match ctx.refer_choices {
                Some(ref choices) if choices.iter().any(|c| c == value) => {}
                Some(ref choices) => report.errors.push(format!(
                    "reference '{value}' is not a known key (known: {})",
                    choices.join(",")
                )),
                None => report
                    .errors
                    .push(format!("reference '{value}' cannot be resolved")),
            },
            ValueType::File | ValueType::Dir => {
                let path = match ctx.root_dir {
                    Some(ref root) if Path::new(value).is_relative() => root.join(value),
                    _ => std::path::PathBuf::from(value),
                };
                let kind_ok = if self.value_type == ValueType::File {
                    path.is_file()
                } else {
                    path.is_dir()
                };
                if !kind_ok {
                    report.warnings.push(format!(
                        "{} '{}' does not exist or is not a {}",
                        self.value_type,
                        path.display(),
                        self.value_type
                    ));
                }
            }
        }
    }

    fn check_bounds(&self, value: &str, report: &mut CheckReport) {
        if !self.value_type.is_numeric() {
            return;
        }
        let Ok(number) = value.parse::<f64>() else {
            return; // the type stage already reported this
        };
        if let Some(min) = self.min {
            if number < min {
                report
                    .errors
                    .push(format!("value {value} is below min {min}"));
            }
        }
        if let Some(max) = self.max {
            if number > max {
                report
                    .errors
                    .push(format!("value {value} is above max {max}"));
            }
        }
    }
}

/// Builder for [`ValueSpec`]; `build()` performs the model checks.
#[derive(Clone, Default)]
pub struct ValueSpecBuilder {
    value_type: Option<ValueType>,
    min: Option<f64>,
    max: Option<f64>,
    choice: Vec<String>,
    write_as: Option<[String; 2]>,
    default: Option<String>,
    upstream_default: Option<String>,
    mandatory: bool,
    match_pattern: Option<String>,
    grammar: Option<String>,
    warn_if_match: Vec<(String, Option<String>, Option<FixFn>)>,
    warn_unless_match: Vec<(String, Option<String>, Option<FixFn>)>,
    assert_rules: Vec<CodeRule>,
    warn_if: Vec<CodeRule>,
    warn_unless: Vec<CodeRule>,
    warn: Option<String>,
    convert: Option<CaseConvert>,
    replace: Vec<(String, String)>,
    replace_follow: Option<String>,
    compute: Option<ComputeSpec>,
    migrate_from: Option<ComputeSpec>,
    help: Vec<(String, String)>,
    refer_to: Option<String>,
    computed_refer_to: Option<ComputeSpec>,
}

impl ValueSpecBuilder {
    fn new(value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            ..Self::default()
        }
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Sets the enum choice set.
    #[must_use]
    pub fn choice(mut self, choices: &[&str]) -> Self {
        self.choice = choices.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Sets the boolean write-back spellings `[false, true]`.
    #[must_use]
    pub fn write_as(mut self, false_str: &str, true_str: &str) -> Self {
        self.write_as = Some([false_str.to_string(), true_str.to_string()]);
        self
    }

    /// Sets the schema default.
    #[must_use]
    pub fn default_value(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    /// Sets the upstream default.
    #[must_use]
    pub fn upstream_default(mut self, default: &str) -> Self {
        self.upstream_default = Some(default.to_string());
        self
    }

    /// Marks the leaf mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Sets the validation regex.
    #[must_use]
    pub fn match_pattern(mut self, pattern: &str) -> Self {
        self.match_pattern = Some(pattern.to_string());
        self
    }

    /// Sets the value grammar (compiled at build time).
    #[must_use]
    pub fn grammar(mut self, rules: &str) -> Self {
        self.grammar = Some(rules.to_string());
        self
    }

    /// Adds a warn-if-match rule.
    #[must_use]
    pub fn warn_if_match(mut self, pattern: &str, msg: Option<&str>, fix: Option<FixFn>) -> Self {
        self.warn_if_match
            .push((pattern.to_string(), msg.map(str::to_string), fix));
        self
    }

    /// Adds a warn-unless-match rule.
    #[must_use]
    pub fn warn_unless_match(
        mut self,
        pattern: &str,
        msg: Option<&str>,
        fix: Option<FixFn>,
    ) -> Self {
        self.warn_unless_match
            .push((pattern.to_string(), msg.map(str::to_string), fix));
        self
    }

    /// Adds a code assertion (reject on false).
    #[must_use]
    pub fn assert_rule(
        mut self,
        label: &str,
        code: AssertFn,
        msg: Option<&str>,
        fix: Option<FixFn>,
    ) -> Self {
        self.assert_rules.push(CodeRule {
            label: label.to_string(),
            code,
            msg: msg.map(str::to_string),
            fix,
        });
        self
    }

    /// Adds a warn-if code rule (warn on true).
    #[must_use]
    pub fn warn_if_code(
        mut self,
        label: &str,
        code: AssertFn,
        msg: Option<&str>,
        fix: Option<FixFn>,
    ) -> Self {
        self.warn_if.push(CodeRule {
            label: label.to_string(),
            code,
            msg: msg.map(str::to_string),
            fix,
        });
        self
    }

    /// Adds a warn-unless code rule (warn on false).
    #[must_use]
    pub fn warn_unless_code(
        mut self,
        label: &str,
        code: AssertFn,
        msg: Option<&str>,
        fix: Option<FixFn>,
    ) -> Self {
        self.warn_unless.push(CodeRule {
            label: label.to_string(),
            code,
            msg: msg.map(str::to_string),
            fix,
        });
        self
    }

    /// Sets the unconditional store-time warning.
    #[must_use]
    pub fn warn(mut self, msg: &str) -> Self {
        self.warn = Some(msg.to_string());
        self
    }

    /// Sets the case conversion applied on store.
    #[must_use]
    pub fn convert(mut self, convert: CaseConvert) -> Self {
        self.convert = Some(convert);
        self
    }

    /// Adds a replace-table entry (literal-or-regex pattern to canonical
    /// value).
    #[must_use]
    pub fn replace(mut self, from: &str, to: &str) -> Self {
        self.replace.push((from.to_string(), to.to_string()));
        self
    }

    /// Follows an external hash as replacement map on fetch.
    #[must_use]
    pub fn replace_follow(mut self, path: &str) -> Self {
        self.replace_follow = Some(path.to_string());
        self
    }

    /// Sets the compute spec.
    #[must_use]
    pub fn compute(mut self, compute: ComputeSpec) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Sets the one-shot migration spec.
    #[must_use]
    pub fn migrate_from(mut self, migrate: ComputeSpec) -> Self {
        self.migrate_from = Some(migrate);
        self
    }

    /// Adds a help entry (regex pattern to text).
    #[must_use]
    pub fn help(mut self, pattern: &str, text: &str) -> Self {
        self.help.push((pattern.to_string(), text.to_string()));
        self
    }

    /// Sets the reference choice source path.
    #[must_use]
    pub fn refer_to(mut self, path: &str) -> Self {
        self.refer_to = Some(path.to_string());
        self
    }

    /// Sets the formula-templated reference choice source.
    #[must_use]
    pub fn computed_refer_to(mut self, compute: ComputeSpec) -> Self {
        self.computed_refer_to = Some(compute);
        self
    }

    /// Builds the spec, performing the model consistency checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Model`] for inconsistent schemas: `write_as` on a
    /// non-boolean, both defaults set, defaults failing their own
    /// validators, bounds on non-numeric types, enum without choices,
    /// reference without a choice source, match on unmatchable types, or
    /// invalid embedded regexes/grammars.
    pub fn build(self) -> Result<ValueSpec> {
        let value_type = self
            .value_type
            .ok_or_else(|| Error::model("leaf without value_type"))?;

        if self.write_as.is_some() && value_type != ValueType::Boolean {
            return Err(Error::model(format!(
                "write_as is only valid on boolean leaves, not {value_type}"
            )));
        }
        if self.default.is_some() && self.upstream_default.is_some() {
            return Err(Error::model(
                "default and upstream_default are mutually exclusive",
            ));
        }
        if (self.min.is_some() || self.max.is_some()) && !value_type.is_numeric() {
            return Err(Error::model(format!(
                "min/max bounds are only valid on numeric leaves, not {value_type}"
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if max < min {
                return Err(Error::model(format!("max {max} is below min {min}")));
            }
        }
        match value_type {
            ValueType::Enum => {
                if self.choice.is_empty() {
                    return Err(Error::model("enum leaf requires a choice list"));
                }
            }
            ValueType::Reference => {
                if self.refer_to.is_none() && self.computed_refer_to.is_none() {
                    return Err(Error::model(
                        "reference leaf requires refer_to or computed_refer_to",
                    ));
                }
            }
            _ => {
                if !self.choice.is_empty() {
                    return Err(Error::model(format!(
                        "choice list is only valid on enum leaves, not {value_type}"
                    )));
                }
            }
        }
        if self.match_pattern.is_some() && !value_type.is_matchable() {
            return Err(Error::model(format!(
                "match regex is only valid on string, uniline or enum leaves, not {value_type}"
            )));
        }

        let match_regex = self
            .match_pattern
            .map(|p| {
                Regex::new(&p).map_err(|e| Error::model(format!("invalid match regex /{p}/: {e}")))
            })
            .transpose()?;

        let grammar = self.grammar.map(|g| Grammar::compile(&g)).transpose()?;

        let compile_rules = |rules: Vec<(String, Option<String>, Option<FixFn>)>| {
            rules
                .into_iter()
                .map(|(pattern, msg, fix)| {
                    Regex::new(&pattern)
                        .map(|re| RegexRule {
                            pattern: re,
                            msg,
                            fix,
                        })
                        .map_err(|e| Error::model(format!("invalid warn regex /{pattern}/: {e}")))
                })
                .collect::<Result<Vec<_>>>()
        };
        let warn_if_match = compile_rules(self.warn_if_match)?;
        let warn_unless_match = compile_rules(self.warn_unless_match)?;

        let replace = self
            .replace
            .into_iter()
            .map(|(from, to)| {
                Regex::new(&format!("^(?:{from})$"))
                    .map(|re| ReplaceRule {
                        raw: from.clone(),
                        regex: re,
                        to,
                    })
                    .map_err(|e| Error::model(format!("invalid replace pattern /{from}/: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        // Help patterns are tried longest-first; "." and ".*" go last.
        let mut help_entries = self.help;
        help_entries.sort_by(|a, b| {
            let rank = |p: &str| if p == "." || p == ".*" { 0 } else { p.len() };
            rank(&b.0).cmp(&rank(&a.0))
        });
        let help = help_entries
            .into_iter()
            .map(|(pattern, text)| {
                Regex::new(&pattern)
                    .map(|re| (re, pattern.clone(), text))
                    .map_err(|e| Error::model(format!("invalid help pattern /{pattern}/: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let choice_set: HashSet<String> = self.choice.iter().cloned().collect();

        let spec = ValueSpec {
            value_type,
            min: self.min,
            max: self.max,
            choice: self.choice,
            choice_set,
            write_as: self.write_as,
            default: self.default,
            upstream_default: self.upstream_default,
            mandatory: self.mandatory,
            match_regex,
            grammar,
            warn_if_match,
            warn_unless_match,
            assert_rules: self.assert_rules,
            warn_if: self.warn_if,
            warn_unless: self.warn_unless,
            warn: self.warn,
            convert: self.convert,
            replace,
            replace_follow: self.replace_follow,
            compute: self.compute,
            migrate_from: self.migrate_from,
            help,
            refer_to: self.refer_to,
            computed_refer_to: self.computed_refer_to,
        };

        // Defaults must satisfy the spec's own validators (except for
        // reference leaves, whose choice set only exists at run time).
        for default in [&spec.default, &spec.upstream_default]
            .into_iter()
            .flatten()
        {
            if spec.value_type == ValueType::Reference {
                continue;
            }
            let canonical = spec.transform(default).map_err(|e| {
                Error::model(format!("default value '{default}' fails validation: {e}"))
            })?;
            let report = spec.check_value(&canonical, &CheckContext::default());
            if !report.is_ok() {
                return Err(Error::model(format!(
                    "default value '{default}' fails validation: {}",
                    report.errors.join("; ")
                )));
            }
        }

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_spec_and_membership() {
        let spec = ValueSpec::builder(ValueType::Enum)
            .choice(&["A", "B", "C"])
            .default_value("A")
            .build()
            .unwrap();
        assert!(spec.has_choice("B"));
        assert!(!spec.has_choice("Z"));
    }

    #[test]
    fn test_enum_requires_choice() {
        assert!(ValueSpec::builder(ValueType::Enum).build().is_err());
    }

    #[test]
    fn test_write_as_on_non_boolean_rejected() {
        let err = ValueSpec::builder(ValueType::Integer)
            .write_as("no", "yes")
            .build()
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_conflicting_defaults_rejected() {
        let err = ValueSpec::builder(ValueType::String)
            .default_value("a")
            .upstream_default("b")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("mutually exclusive"));
    }

    #[test]
    fn test_bounds_on_string_rejected() {
        assert!(ValueSpec::builder(ValueType::String).min(1.0).build().is_err());
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = ValueSpec::builder(ValueType::Integer)
            .default_value("not-a-number")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("fails validation"));
    }

    #[test]
    fn test_boolean_normalization() {
        let spec = ValueSpec::builder(ValueType::Boolean).build().unwrap();
        for truthy in ["y", "yes", "True", "ON", "1"] {
            assert_eq!(spec.normalize_boolean(truthy).unwrap(), "1");
        }
        for falsy in ["n", "no", "False", "off", "0", ""] {
            assert_eq!(spec.normalize_boolean(falsy).unwrap(), "0");
        }
        assert!(spec.normalize_boolean("maybe").is_err());
    }

    #[test]
    fn test_boolean_write_as_normalization() {
        let spec = ValueSpec::builder(ValueType::Boolean)
            .write_as("false", "true")
            .build()
            .unwrap();
        assert_eq!(spec.normalize_boolean("true").unwrap(), "1");
        assert_eq!(spec.normalize_boolean("false").unwrap(), "0");
    }

    #[test]
    fn test_transform_applies_convert_then_replace() {
        let spec = ValueSpec::builder(ValueType::String)
            .convert(CaseConvert::Lc)
            .replace("perl", "Perl5")
            .build()
            .unwrap();
        assert_eq!(spec.transform("PERL").unwrap(), "Perl5");
        assert_eq!(spec.transform("other").unwrap(), "other");
    }

    #[test]
    fn test_replace_regex_pattern() {
        let spec = ValueSpec::builder(ValueType::String)
            .replace("foo\\d+", "foo")
            .build()
            .unwrap();
        assert_eq!(spec.transform("foo123").unwrap(), "foo");
        // Anchored: partial matches do not replace.
        assert_eq!(spec.transform("xfoo123").unwrap(), "xfoo123");
    }

    #[test]
    fn test_check_integer_bounds() {
        let spec = ValueSpec::builder(ValueType::Integer)
            .min(-10.0)
            .max(10.0)
            .build()
            .unwrap();
        let ctx = CheckContext::default();
        assert!(spec.check_value("5", &ctx).is_ok());
        assert!(spec.check_value("-10", &ctx).is_ok());
        assert!(!spec.check_value("11", &ctx).is_ok());
        assert!(!spec.check_value("five", &ctx).is_ok());
    }

    #[test]
    fn test_check_uniline() {
        let spec = ValueSpec::builder(ValueType::Uniline).build().unwrap();
        let ctx = CheckContext::default();
        assert!(spec.check_value("one line", &ctx).is_ok());
        assert!(!spec.check_value("two\nlines", &ctx).is_ok());
    }

    #[test]
    fn test_warn_if_match_collects_fix() {
        let fix: FixFn = Arc::new(|v: &str| v.to_uppercase());
        let spec = ValueSpec::builder(ValueType::String)
            .warn_if_match("foo", None, Some(fix))
            .build()
            .unwrap();
        let report = spec.check_value("foobar", &CheckContext::default());
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.fix_count(), 1);
        let fixed = (report.fixes[0].1)("foobar");
        assert_eq!(fixed, "FOOBAR");
    }

    #[test]
    fn test_assert_rule_fails_check() {
        let code: AssertFn = Arc::new(|v: &str| !v.is_empty());
        let spec = ValueSpec::builder(ValueType::String)
            .assert_rule("not_empty", code, Some("must not be empty"), None)
            .build()
            .unwrap();
        let report = spec.check_value("", &CheckContext::default());
        assert_eq!(report.errors, vec!["must not be empty".to_string()]);
    }

    #[test]
    fn test_reference_checks_live_choices() {
        let spec = ValueSpec::builder(ValueType::Reference)
            .refer_to("- hosts")
            .build()
            .unwrap();
        let ctx = CheckContext {
            refer_choices: Some(vec!["alpha".to_string(), "beta".to_string()]),
            root_dir: None,
        };
        assert!(spec.check_value("alpha", &ctx).is_ok());
        assert!(!spec.check_value("gamma", &ctx).is_ok());
        assert!(!spec.check_value("alpha", &CheckContext::default()).is_ok());
    }

    #[test]
    fn test_file_missing_is_warning_not_error() {
        let spec = ValueSpec::builder(ValueType::File).build().unwrap();
        let report = spec.check_value("/nonexistent/zzz", &CheckContext::default());
        assert!(report.is_ok());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_help_longest_first_with_fallback() {
        let spec = ValueSpec::builder(ValueType::String)
            .help(".", "generic help")
            .help("foo", "help about foo")
            .help("foobar", "help about foobar")
            .build()
            .unwrap();
        assert_eq!(spec.help_for("foobar!"), Some("help about foobar"));
        assert_eq!(spec.help_for("foo!"), Some("help about foo"));
        assert_eq!(spec.help_for("other"), Some("generic help"));
    }

    #[test]
    fn test_compute_substitution() {
        let compute = ComputeSpec::new("$a and ${b}", &[("a", "- a"), ("b", "- b")]);
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), "left".to_string());
        values.insert("b".to_string(), "right".to_string());
        assert_eq!(compute.substitute(&values), "left and right");
    }

    #[test]
    fn test_compute_substitution_with_replace() {
        let compute =
            ComputeSpec::new("$a", &[("a", "- a")]).with_replace("oui", "yes");
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), "oui".to_string());
        assert_eq!(compute.substitute(&values), "yes");
    }

    #[test]
    fn test_eval_arith() {
        assert_eq!(eval_arith("1 + 2 * 3").unwrap(), 7);
        assert_eq!(eval_arith("(1 + 2) * 3").unwrap(), 9);
        assert_eq!(eval_arith("-4 / 2").unwrap(), -2);
        assert!(eval_arith("1 / 0").is_err());
        assert!(eval_arith("1 +").is_err());
        assert!(eval_arith("nope").is_err());
    }
}
