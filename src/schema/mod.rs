//! The immutable configuration model.
//!
//! This module defines the schema side of the engine: a [`Catalog`] of
//! named [`ConfigClass`]es, each an ordered list of element
//! specifications. Leaves are governed by [`ValueSpec`], collections by
//! [`CollectionSpec`], and dynamic property changes by [`WarpSpec`].
//! The live tree (see [`crate::tree`]) holds references into this model
//! and never mutates it; warp effects overlay specs rather than edit
//! them.
//!
//! # Examples
//!
//! Building a small catalog:
//!
//! ```
//! use arbor::schema::{
//!     Catalog, ConfigClass, ElementKind, ElementSpec, ValueSpec, ValueType,
//! };
//! use std::sync::Arc;
//!
//! let fqdn = Arc::new(
//!     ValueSpec::builder(ValueType::Uniline)
//!         .mandatory()
//!         .build()
//!         .unwrap(),
//! );
//! let mut catalog = Catalog::new();
//! catalog
//!     .add_class(
//!         ConfigClass::new("Host")
//!             .element(ElementSpec::new("fqdn", ElementKind::Leaf(fqdn)))
//!             .build()
//!             .unwrap(),
//!     )
//!     .unwrap();
//! catalog.check().unwrap();
//! ```

pub mod catalog;
pub mod class;
pub mod collection;
pub mod grammar;
pub mod value;
pub mod warp;

pub use catalog::Catalog;
pub use class::{
    AcceptSpec, ConfigClass, ConfigClassBuilder, ElementKind, ElementSpec, Level, RwConfig, Status,
};
pub use collection::{
    CargoSpec, CheckListSpec, CollectionSpec, CollectionSpecBuilder, DuplicatesPolicy, IndexType,
};
pub use grammar::Grammar;
pub use value::{
    eval_arith, AssertFn, CaseConvert, CheckContext, CheckReport, CodeRule, ComputeSpec, FixFn,
    RegexRule, ReplaceRule, ValueSpec, ValueSpecBuilder, ValueType,
};
pub use warp::{WarpEffects, WarpRule, WarpSpec};
