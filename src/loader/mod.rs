//! The command DSL.
//!
//! A load program is a whitespace-separated sequence of commands executed
//! left to right against a stack whose top is the current node. Quotes
//! delimit values containing spaces; within a double-quoted string, `\"`
//! and `\\` are escapes and a literal `\n` denotes a newline.
//!
//! ```text
//! command    := '!' | '-' | '/name' | element_cmd
//! element    := name (action)? (subaction)? ('#' annotation)?
//! action     := ':' id | ':.' method '(' args ')' | ':=' values
//!             | ':~' pattern | ':<' v | ':>' v | ':@'
//!             | ':-' id | ':-=' v | ':-~' pattern | ':=~' s/// | '~'
//! subaction  := '=' v | '.=' v | '=~' s/// | '=.file(p)' | '=.json(p)'
//!             | '=.yaml(p)' | '=.env(NAME)'
//! ```
//!
//! # Examples
//!
//! ```
//! use arbor::{CheckPolicy, FetchMode, Instance};
//! # use arbor::schema::*;
//! # use std::sync::Arc;
//! # let leaf = Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
//! # let hash = Arc::new(
//! #     CollectionSpec::hash(CargoSpec::Leaf(Arc::clone(&leaf))).build().unwrap());
//! # let mut catalog = Catalog::new();
//! # catalog.add_class(
//! #     ConfigClass::new("Master")
//! #         .element(ElementSpec::new("plain_hash", ElementKind::Hash(hash)))
//! #         .build().unwrap()).unwrap();
//! let mut instance = Instance::new(Arc::new(catalog), "Master").unwrap();
//! instance.load("plain_hash:foo=boo", CheckPolicy::Yes).unwrap();
//! assert_eq!(
//!     instance.fetch_path("plain_hash:foo", FetchMode::User).unwrap(),
//!     Some("boo".to_string())
//! );
//! ```

mod command;
pub(crate) mod data;
mod exec;

use crate::error::Result;
use crate::tree::path::split_tokens;
use crate::tree::{CheckPolicy, ItemId};
use crate::Instance;
use command::Command;
use exec::Executor;

/// Parses and executes a load program against a starting node.
///
/// # Errors
///
/// Returns [`Error::Load`](crate::Error) for parse failures and the
/// termination rules ("searched item not found", "too many '-'"), plus
/// whatever the executed operations raise under the given check policy.
pub(crate) fn run(
    instance: &mut Instance,
    start: ItemId,
    program: &str,
    check: CheckPolicy,
) -> Result<()> {
    let tokens = split_tokens(program)?;
    let commands = tokens
        .iter()
        .map(|t| Command::parse(t))
        .collect::<Result<Vec<_>>>()?;
    Executor::new(instance, check).run(start, &commands)
}
