//! Shared catalog builders for the integration suites.
#![allow(dead_code)]

use arbor::schema::{
    CargoSpec, Catalog, CheckListSpec, CollectionSpec, ConfigClass, DuplicatesPolicy, ElementKind,
    ElementSpec, FixFn, ValueSpec, ValueType,
};
use arbor::Instance;
use std::sync::Arc;

fn leaf(spec: ValueSpec) -> ElementKind {
    ElementKind::Leaf(Arc::new(spec))
}

fn string_leaf() -> Arc<ValueSpec> {
    Arc::new(ValueSpec::builder(ValueType::String).build().unwrap())
}

/// The master test catalog: one class exercising leaves, hashes, lists
/// and check-lists, plus a sub-class used as hash cargo.
pub fn master_catalog() -> Arc<Catalog> {
    let mut catalog = Catalog::new();

    let sub = ConfigClass::new("Sub")
        .element(ElementSpec::new("foo", leaf(ValueSpec::builder(ValueType::String).build().unwrap())))
        .element(ElementSpec::new("bar", leaf(ValueSpec::builder(ValueType::String).build().unwrap())))
        .build()
        .unwrap();
    catalog.add_class(sub).unwrap();

    let std_cargo = ConfigClass::new("Std")
        .element(ElementSpec::new(
            "DX",
            leaf(ValueSpec::builder(ValueType::Enum)
                .choice(&["Av", "Bv", "Cv"])
                .default_value("Av")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "int_v",
            leaf(ValueSpec::builder(ValueType::Integer)
                .min(0.0)
                .max(20.0)
                .default_value("10")
                .build()
                .unwrap()),
        ))
        .build()
        .unwrap();
    catalog.add_class(std_cargo).unwrap();

    let uc_fix: FixFn = Arc::new(|v: &str| v.to_uppercase());

    let master = ConfigClass::new("Master")
        .element(ElementSpec::new(
            "mandatory_with_default_value",
            leaf(ValueSpec::builder(ValueType::String)
                .mandatory()
                .default_value("booya")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "an_enum",
            leaf(ValueSpec::builder(ValueType::Enum)
                .choice(&["A", "B", "C"])
                .default_value("A")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "with_upstream",
            leaf(ValueSpec::builder(ValueType::String)
                .upstream_default("up")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "int_v",
            leaf(ValueSpec::builder(ValueType::Integer)
                .min(5.0)
                .max(15.0)
                .default_value("10")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "a_boolean",
            leaf(ValueSpec::builder(ValueType::Boolean).build().unwrap()),
        ))
        .element(ElementSpec::new(
            "boolean_with_write_as",
            leaf(ValueSpec::builder(ValueType::Boolean)
                .write_as("false", "true")
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "warned_string",
            leaf(ValueSpec::builder(ValueType::String)
                .warn_if_match("foo", None, Some(Arc::clone(&uc_fix)))
                .build()
                .unwrap()),
        ))
        .element(ElementSpec::new(
            "plain_hash",
            ElementKind::Hash(Arc::new(
                CollectionSpec::hash(CargoSpec::Leaf(string_leaf()))
                    .build()
                    .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "bounded_list",
            ElementKind::List(Arc::new(
                CollectionSpec::list(CargoSpec::Leaf(string_leaf()))
                    .max_nb(4)
                    .build()
                    .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "dup_forbid_list",
            ElementKind::List(Arc::new(
                CollectionSpec::list(CargoSpec::Leaf(string_leaf()))
                    .duplicates(DuplicatesPolicy::Forbid)
                    .build()
                    .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "dup_suppress_list",
            ElementKind::List(Arc::new(
                CollectionSpec::list(CargoSpec::Leaf(string_leaf()))
                    .duplicates(DuplicatesPolicy::Suppress)
                    .build()
                    .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "hash_with_defaults",
            ElementKind::Hash(Arc::new(
                CollectionSpec::hash(CargoSpec::Leaf(string_leaf()))
                    .default_keys(&["dk1", "dk2"])
                    .build()
                    .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "hash_of_nodes",
            ElementKind::Hash(Arc::new(
                CollectionSpec::hash(CargoSpec::Node {
                    class: "Sub".to_string(),
                })
                .build()
                .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "std_id",
            ElementKind::Hash(Arc::new(
                CollectionSpec::hash(CargoSpec::Node {
                    class: "Std".to_string(),
                })
                .build()
                .unwrap(),
            )),
        ))
        .element(ElementSpec::new(
            "a_checklist",
            ElementKind::CheckList(Arc::new(
                CheckListSpec::new(&["c1", "c2", "c3"], &[]).unwrap(),
            )),
        ))
        .build()
        .unwrap();
    catalog.add_class(master).unwrap();

    Arc::new(catalog)
}

/// A fresh instance over the master catalog.
pub fn master_instance() -> Instance {
    Instance::new(master_catalog(), "Master").unwrap()
}
