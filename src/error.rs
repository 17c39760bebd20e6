//! Error types for the arbor library.
//!
//! This module provides the error taxonomy shared by the schema, tree and
//! loader layers, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Result type alias for operations that may fail with an arbor error.
///
/// # Examples
///
/// ```
/// use arbor::{Error, Result};
///
/// fn example_operation() -> Result<String> {
///     Ok("booya".to_string())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the arbor library.
///
/// Each variant maps to one kind of failure: model (schema) inconsistency,
/// user mistakes against a consistent model, validation failures, loader
/// parse/execution failures, and internal assertions.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema itself is inconsistent or an unrecoverable invariant
    /// was violated (fix-loop limit, cyclic warp, bad spec combination).
    #[error("model error: {reason}")]
    Model {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A user-level mistake against a consistent model: reading a
    /// mandatory value that is empty, touching a hidden or obsolete
    /// element.
    #[error("user error at '{path}': {reason}")]
    User {
        /// Tree path of the offending element.
        path: String,
        /// Description of the mistake.
        reason: String,
    },

    /// A value failed validation on store or fetch.
    #[error("wrong value at '{path}': {reason}")]
    WrongValue {
        /// Tree path of the leaf.
        path: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// An operation was applied to an element of an unexpected kind,
    /// e.g. an id lookup on a leaf.
    #[error("wrong element type at '{path}': expected {expected}, found {found}")]
    WrongType {
        /// Tree path of the element.
        path: String,
        /// The kind the operation requires.
        expected: String,
        /// The kind actually found.
        found: String,
    },

    /// An element name is not declared and not acceptable.
    #[error("unknown element '{name}' in '{path}'{}", candidates_suffix(candidates))]
    UnknownElement {
        /// Tree path of the enclosing node.
        path: String,
        /// The unknown element name.
        name: String,
        /// Declared element names, for the error message.
        candidates: Vec<String>,
    },

    /// A collection index is not present and cannot be created.
    #[error("unknown id '{id}' in '{path}'")]
    UnknownId {
        /// Tree path of the collection.
        path: String,
        /// The missing index.
        id: String,
    },

    /// The command DSL failed to parse or execute.
    #[error("load error in command '{command}': {reason}")]
    Load {
        /// The offending command fragment.
        command: String,
        /// Description of the failure.
        reason: String,
    },

    /// A structured-data load (`=.json`, `=.yaml`, collection json)
    /// encountered a mismatching shape.
    #[error("cannot load data at '{path}': {reason}")]
    LoadData {
        /// The data path (file path plus projection segments).
        path: String,
        /// Description of the shape mismatch.
        reason: String,
    },

    /// A backend reported a parse failure with file and line context.
    #[error("syntax error in {file}:{line}: {reason}")]
    Syntax {
        /// The file being parsed.
        file: String,
        /// Line number of the failure (0 when unknown).
        line: u32,
        /// Description of the failure.
        reason: String,
    },

    /// A bug in the engine.
    #[error("internal error: {reason}")]
    Internal {
        /// Description of the assertion failure.
        reason: String,
    },

    /// An I/O error occurred while reading external data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn candidates_suffix(candidates: &[String]) -> String {
    if candidates.is_empty() {
        String::new()
    } else {
        format!(" (declared: {})", candidates.join(", "))
    }
}

impl Error {
    /// Builds a model error from anything displayable.
    pub fn model(reason: impl Into<String>) -> Self {
        Self::Model {
            reason: reason.into(),
        }
    }

    /// Builds an internal error from anything displayable.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if the error is fatal regardless of the check policy.
    ///
    /// Model and internal errors are never converted to recorded
    /// soft-errors; they always surface.
    ///
    /// # Examples
    ///
    /// ```
    /// use arbor::Error;
    ///
    /// assert!(Error::model("cyclic warp").is_fatal());
    /// ```
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Model { .. } | Self::Internal { .. })
    }

    /// Check if the error is a validation failure.
    #[must_use]
    pub fn is_wrong_value(&self) -> bool {
        matches!(self, Self::WrongValue { .. })
    }

    /// Attach file and line context to a backend error that lacks it.
    ///
    /// Syntax errors keep their original location; every other kind is
    /// wrapped into a [`Error::Syntax`] carrying the given location.
    #[must_use]
    pub fn with_location(self, file: &str, line: u32) -> Self {
        match self {
            Self::Syntax {
                file: existing,
                line: existing_line,
                reason,
            } if existing.is_empty() => Self::Syntax {
                file: file.to_string(),
                line: if existing_line == 0 { line } else { existing_line },
                reason,
            },
            Self::Syntax { .. } => self,
            other => Self::Syntax {
                file: file.to_string(),
                line,
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        let line = err
            .location()
            .map_or(0, |l| u32::try_from(l.line()).unwrap_or(0));
        Self::Syntax {
            file: String::new(),
            line,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Syntax {
            file: String::new(),
            line: u32::try_from(err.line()).unwrap_or(0),
            reason: err.to_string(),
        }
    }
}
