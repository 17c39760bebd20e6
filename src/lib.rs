#![deny(missing_docs, unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # arbor
//!
//! A typed configuration tree engine.
//!
//! A configuration is represented as a strongly-typed tree of nodes,
//! hashes, lists and leaves, governed by an immutable schema catalog.
//! Two tightly-coupled subsystems sit on top:
//!
//! - the **loader**, a small textual command DSL for navigating and
//!   mutating the tree (assignments, collection operations, regex
//!   substitutions, annotations, inclusion of external file fragments);
//! - the **typed value model**, the rules governing what may be stored
//!   at each leaf: type, bounds, enum choices, references to other
//!   nodes, validation regexes and grammars, warnings, auto-fixes,
//!   migrations, layered defaults and computed values.
//!
//! ## Core Types
//!
//! - [`schema::Catalog`] and [`schema::ConfigClass`]: the immutable model
//! - [`Instance`]: exclusive owner of one live tree
//! - [`Error`] and [`Result`]: error handling types
//! - [`Logger`] and [`LogLevel`]: logging infrastructure
//!
//! ## Examples
//!
//! ```
//! use arbor::schema::{
//!     Catalog, ConfigClass, ElementKind, ElementSpec, ValueSpec, ValueType,
//! };
//! use arbor::{CheckPolicy, FetchMode, Instance};
//! use std::sync::Arc;
//!
//! let greeting = Arc::new(
//!     ValueSpec::builder(ValueType::String)
//!         .default_value("hello")
//!         .build()
//!         .unwrap(),
//! );
//! let mut catalog = Catalog::new();
//! catalog
//!     .add_class(
//!         ConfigClass::new("Master")
//!             .element(ElementSpec::new("greeting", ElementKind::Leaf(greeting)))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//!
//! let mut instance = Instance::new(Arc::new(catalog), "Master").unwrap();
//! instance.load("greeting=bonjour", CheckPolicy::Yes).unwrap();
//! assert_eq!(
//!     instance.fetch_path("greeting", FetchMode::User).unwrap(),
//!     Some("bonjour".to_string())
//! );
//! assert_eq!(instance.needs_save(), 1);
//! ```

pub mod backend;
pub mod dump;
pub mod error;
mod loader;
pub mod logging;
pub mod schema;
pub mod tree;

// Re-export key types at crate root for convenience
pub use backend::{Backend, BackendRegistry, YamlBackend};
pub use error::{Error, Result};
pub use logging::{init_logger, LogLevel, Logger};
pub use tree::{
    ChangeRecord, CheckPolicy, DataMode, FetchMode, Instance, ItemId, ItemKind, LoadMode,
};
