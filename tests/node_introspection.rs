//! Integration tests for node-level behaviour: element availability,
//! accept rules, status handling, iteration, gists and help texts.

use arbor::schema::{
    Catalog, ConfigClass, ElementKind, ElementSpec, Level, Status, ValueSpec, ValueType,
};
use arbor::{CheckPolicy, FetchMode, Instance};
use std::sync::Arc;

fn leaf(spec: ValueSpec) -> ElementKind {
    ElementKind::Leaf(Arc::new(spec))
}

fn string_leaf() -> ElementKind {
    leaf(ValueSpec::builder(ValueType::String).build().unwrap())
}

fn catalog() -> Arc<Catalog> {
    let mut catalog = Catalog::new();
    catalog
        .add_class(
            ConfigClass::new("Master")
                .element(ElementSpec::new("fqdn", string_leaf()))
                .element(ElementSpec::new(
                    "nickname",
                    leaf(ValueSpec::builder(ValueType::String)
                        .help("^admin", "reserved for operators")
                        .help(".", "any short name")
                        .build()
                        .unwrap()),
                ))
                .element(ElementSpec::new("secret", string_leaf()).with_level(Level::Hidden))
                .element(
                    ElementSpec::new("old_knob", string_leaf()).with_status(Status::Deprecated),
                )
                .element(ElementSpec::new("gone", string_leaf()).with_status(Status::Obsolete))
                .accept("ip_.*", ElementSpec::new("", string_leaf()), Some("fqdn"))
                .gist("host {fqdn} ({nickname})")
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(catalog)
}

fn instance() -> Instance {
    Instance::new(catalog(), "Master").unwrap()
}

#[test]
fn children_filter_hidden_and_non_standard() {
    let mut instance = instance();
    let root = instance.root();
    assert_eq!(
        instance.children(root, false).unwrap(),
        vec!["fqdn".to_string(), "nickname".to_string()]
    );
    assert_eq!(instance.children(root, true).unwrap().len(), 5);
}

#[test]
fn hidden_element_needs_accept_hidden() {
    let mut instance = instance();
    let root = instance.root();
    assert!(instance
        .fetch_element(root, "secret", CheckPolicy::Yes, true, false)
        .is_err());
    assert!(instance
        .fetch_element(root, "secret", CheckPolicy::Skip, true, false)
        .unwrap()
        .is_none());
    assert!(instance
        .fetch_element(root, "secret", CheckPolicy::Yes, true, true)
        .unwrap()
        .is_some());
}

#[test]
fn obsolete_element_fails() {
    let mut instance = instance();
    let root = instance.root();
    assert!(instance
        .fetch_element(root, "gone", CheckPolicy::Yes, true, false)
        .is_err());
    assert!(instance
        .fetch_element(root, "gone", CheckPolicy::No, true, false)
        .unwrap()
        .is_none());
}

#[test]
fn deprecated_element_still_works() {
    let mut instance = instance();
    let root = instance.root();
    let element = instance
        .fetch_element(root, "old_knob", CheckPolicy::Yes, true, false)
        .unwrap();
    assert!(element.is_some());
    assert_eq!(
        instance.element_status(root, "old_knob").unwrap(),
        Status::Deprecated
    );
}

#[test]
fn accepted_element_is_inserted_after_anchor() {
    let mut instance = instance();
    let root = instance.root();
    let element = instance
        .fetch_element(root, "ip_eth0", CheckPolicy::Yes, true, false)
        .unwrap();
    assert!(element.is_some());

    let names = instance.children(root, false).unwrap();
    assert_eq!(
        names,
        vec![
            "fqdn".to_string(),
            "ip_eth0".to_string(),
            "nickname".to_string()
        ]
    );

    instance.store_path("ip_eth0", Some("10.1.1.1")).unwrap();
    assert_eq!(
        instance.fetch_path("ip_eth0", FetchMode::User).unwrap(),
        Some("10.1.1.1".to_string())
    );
}

#[test]
fn unmatched_unknown_element_is_rejected() {
    let mut instance = instance();
    let root = instance.root();
    assert!(instance
        .fetch_element(root, "eth0_ip", CheckPolicy::Yes, true, false)
        .is_err());
}

#[test]
fn next_and_previous_follow_model_order() {
    let instance = instance();
    let root = instance.root();
    assert_eq!(
        instance.next_element(root, None).unwrap(),
        Some("fqdn".to_string())
    );
    assert_eq!(
        instance.next_element(root, Some("fqdn")).unwrap(),
        Some("nickname".to_string())
    );
    assert_eq!(instance.next_element(root, Some("nickname")).unwrap(), None);
    assert_eq!(
        instance.previous_element(root, "nickname").unwrap(),
        Some("fqdn".to_string())
    );
    assert_eq!(instance.previous_element(root, "fqdn").unwrap(), None);
}

#[test]
fn gist_substitutes_element_content() {
    let mut instance = instance();
    let root = instance.root();
    instance.store_path("fqdn", Some("web1.example.com")).unwrap();
    assert_eq!(
        instance.gist(root).unwrap(),
        "host web1.example.com ()"
    );
    instance.store_path("nickname", Some("w1")).unwrap();
    assert_eq!(instance.gist(root).unwrap(), "host web1.example.com (w1)");
}

#[test]
fn help_resolves_longest_pattern_first() {
    let mut instance = instance();
    let nickname = instance.grab("nickname").unwrap();
    instance
        .store(nickname, Some("admin-1"), CheckPolicy::Yes, false)
        .unwrap();
    assert_eq!(
        instance.help(nickname).unwrap().as_deref(),
        Some("reserved for operators")
    );
    instance
        .store(nickname, Some("joe"), CheckPolicy::Yes, false)
        .unwrap();
    assert_eq!(
        instance.help(nickname).unwrap().as_deref(),
        Some("any short name")
    );
}

#[test]
fn element_level_reports_live_value() {
    let instance = instance();
    let root = instance.root();
    assert_eq!(instance.element_level(root, "fqdn").unwrap(), Level::Normal);
    assert_eq!(
        instance.element_level(root, "secret").unwrap(),
        Level::Hidden
    );
}
