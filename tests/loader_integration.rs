//! Integration tests for the command DSL: navigation, collection
//! operations, regex loops, data sources, termination rules and the
//! dump round-trip.

mod common;

use arbor::{CheckPolicy, FetchMode, LoadMode};
use common::master_instance;
use std::fs;
use tempfile::TempDir;

#[test]
fn loader_sequence_scenario() {
    let mut instance = master_instance();
    instance
        .load(
            "plain_hash:foo=boo bounded_list=foo,bar,baz \
             hash_of_nodes:\"foo node\" foo=\"in foo node\" - \
             hash_of_nodes:\"bar node\" bar=\"in bar node\"",
            CheckPolicy::Yes,
        )
        .unwrap();

    assert_eq!(
        instance.fetch_path("plain_hash:foo", FetchMode::User).unwrap(),
        Some("boo".to_string())
    );

    let list = instance.grab("bounded_list").unwrap();
    let contents = instance.coll_contents(list).unwrap();
    let contents: Vec<_> = contents.into_iter().flatten().collect();
    assert_eq!(contents, vec!["foo", "bar", "baz"]);

    assert_eq!(
        instance
            .fetch_path("hash_of_nodes:\"foo node\" foo", FetchMode::User)
            .unwrap(),
        Some("in foo node".to_string())
    );
    assert_eq!(
        instance
            .fetch_path("hash_of_nodes:\"bar node\" bar", FetchMode::User)
            .unwrap(),
        Some("in bar node".to_string())
    );
}

#[test]
fn regex_loop_sets_every_matching_key() {
    let mut instance = master_instance();
    instance
        .load("std_id:ab - std_id:bc", CheckPolicy::Yes)
        .unwrap();

    instance
        .load("std_id:~/^\\w+$/ DX=Bv int_v=9", CheckPolicy::Yes)
        .unwrap();

    for key in ["ab", "bc"] {
        assert_eq!(
            instance
                .fetch_path(&format!("std_id:{key} DX"), FetchMode::User)
                .unwrap(),
            Some("Bv".to_string()),
            "DX at {key}"
        );
        assert_eq!(
            instance
                .fetch_path(&format!("std_id:{key} int_v"), FetchMode::User)
                .unwrap(),
            Some("9".to_string()),
            "int_v at {key}"
        );
    }
}

#[test]
fn regex_loop_pop_confines_the_tail() {
    let mut instance = master_instance();
    instance
        .load("std_id:ab - std_id:bc", CheckPolicy::Yes)
        .unwrap();

    instance
        .load("std_id:~/^\\w+$/ DX=Bv - int_v=9", CheckPolicy::Yes)
        .unwrap();

    for key in ["ab", "bc"] {
        assert_eq!(
            instance
                .fetch_path(&format!("std_id:{key} DX"), FetchMode::User)
                .unwrap(),
            Some("Bv".to_string())
        );
        // The pop ended each iteration before int_v.
        assert_eq!(
            instance
                .fetch_path(&format!("std_id:{key} int_v"), FetchMode::User)
                .unwrap(),
            Some("10".to_string())
        );
    }
}

#[test]
fn regex_loop_filters_keys() {
    let mut instance = master_instance();
    instance
        .load("std_id:ab - std_id:b.c", CheckPolicy::Yes)
        .unwrap();
    instance
        .load("std_id:~/^\\w+$/ DX=Cv", CheckPolicy::Yes)
        .unwrap();

    assert_eq!(
        instance.fetch_path("std_id:ab DX", FetchMode::User).unwrap(),
        Some("Cv".to_string())
    );
    assert_eq!(
        instance.fetch_path("std_id:b.c DX", FetchMode::User).unwrap(),
        Some("Av".to_string())
    );
}

#[test]
fn too_many_pops_is_an_error() {
    let mut instance = master_instance();
    let err = instance
        .load("plain_hash:foo=boo - - int_v=9", CheckPolicy::Yes)
        .unwrap_err();
    assert!(format!("{err}").contains("too many '-'"));

    // The same program stops silently with skip.
    let mut instance = master_instance();
    instance
        .load("plain_hash:foo=boo - - int_v=9", CheckPolicy::Skip)
        .unwrap();
    assert_eq!(
        instance.fetch_path("int_v", FetchMode::User).unwrap(),
        Some("10".to_string())
    );
}

#[test]
fn residual_search_reports_item_not_found() {
    let mut instance = master_instance();
    let err = instance
        .load("- /zzz", CheckPolicy::Yes)
        .unwrap_err();
    assert!(format!("{err}").contains("not found"));
}

#[test]
fn search_navigates_to_owning_node() {
    let mut instance = master_instance();
    instance
        .load(
            "hash_of_nodes:n1 foo=f1 /int_v int_v=9",
            CheckPolicy::Yes,
        )
        .unwrap();
    assert_eq!(
        instance.fetch_path("int_v", FetchMode::User).unwrap(),
        Some("9".to_string())
    );
    assert_eq!(
        instance
            .fetch_path("hash_of_nodes:n1 foo", FetchMode::User)
            .unwrap(),
        Some("f1".to_string())
    );
}

#[test]
fn leaf_append_and_substitution() {
    let mut instance = master_instance();
    instance
        .load("plain_hash:k=hello plain_hash:k.=\" world\"", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:k", FetchMode::User).unwrap(),
        Some("hello world".to_string())
    );

    instance
        .load("plain_hash:k=~s/WORLD/there/i", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:k", FetchMode::User).unwrap(),
        Some("hello there".to_string())
    );
}

#[test]
fn leaf_clear_with_tilde() {
    let mut instance = master_instance();
    instance.load("an_enum=B", CheckPolicy::Yes).unwrap();
    instance.load("an_enum~", CheckPolicy::Yes).unwrap();
    assert_eq!(
        instance.fetch_path("an_enum", FetchMode::User).unwrap(),
        Some("A".to_string())
    );
}

#[test]
fn collection_methods() {
    let mut instance = master_instance();
    instance
        .load("bounded_list:.push(a,b)", CheckPolicy::Yes)
        .unwrap();
    instance
        .load("bounded_list:.unshift(z)", CheckPolicy::Yes)
        .unwrap();
    let list = instance.grab("bounded_list").unwrap();
    let contents: Vec<_> = instance
        .coll_contents(list)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(contents, vec!["z", "a", "b"]);

    instance.load("bounded_list:.sort", CheckPolicy::Yes).unwrap();
    let contents: Vec<_> = instance
        .coll_contents(list)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(contents, vec!["a", "b", "z"]);

    instance
        .load("bounded_list:-=b bounded_list:.rm(0)", CheckPolicy::Yes)
        .unwrap();
    let contents: Vec<_> = instance
        .coll_contents(list)
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(contents, vec!["z"]);

    instance.load("bounded_list:.clear", CheckPolicy::Yes).unwrap();
    assert_eq!(instance.coll_len(list).unwrap(), 0);
}

#[test]
fn list_cardinality_is_a_hard_error() {
    let mut instance = master_instance();
    let err = instance
        .load("bounded_list=a,b,c,d,e", CheckPolicy::Yes)
        .unwrap_err();
    assert!(format!("{err}").contains("max_nb"));
    // Nothing was silently truncated.
    let list = instance.grab("bounded_list").unwrap();
    assert_eq!(instance.coll_len(list).unwrap(), 0);
}

#[test]
fn hash_remove_by_pattern() {
    let mut instance = master_instance();
    instance
        .load("plain_hash:ka=1 plain_hash:kb=2 plain_hash:xc=3", CheckPolicy::Yes)
        .unwrap();
    instance.load("plain_hash:-~/^k/", CheckPolicy::Yes).unwrap();
    let hash = instance.grab("plain_hash").unwrap();
    assert_eq!(instance.coll_keys(hash).unwrap(), vec!["xc"]);
}

#[test]
fn annotations_attach_to_targets() {
    let mut instance = master_instance();
    instance
        .load("an_enum=B#\"chosen by test\"", CheckPolicy::Yes)
        .unwrap();
    let leaf = instance.grab("an_enum").unwrap();
    assert_eq!(instance.annotation(leaf), Some("chosen by test"));
}

#[test]
fn checklist_store_and_clear() {
    let mut instance = master_instance();
    instance.load("a_checklist=c1,c3", CheckPolicy::Yes).unwrap();
    let checklist = instance.grab("a_checklist").unwrap();
    assert_eq!(
        instance.checklist_checked(checklist).unwrap(),
        vec!["c1".to_string(), "c3".to_string()]
    );
    instance.load("a_checklist~", CheckPolicy::Yes).unwrap();
    assert!(instance.checklist_checked(checklist).unwrap().is_empty());
}

#[test]
fn load_from_file_sources() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("motd.txt"), "be nice\n").unwrap();
    fs::write(
        dir.path().join("conf.json"),
        r#"{"deep": {"list": ["x", "boo"]}}"#,
    )
    .unwrap();
    fs::write(dir.path().join("conf.yaml"), "first: 1\n---\nvalue: B\n").unwrap();

    let mut instance = master_instance().with_root_dir(dir.path());
    instance
        .load("plain_hash:motd=.file(motd.txt)", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:motd", FetchMode::User).unwrap(),
        Some("be nice".to_string())
    );

    instance
        .load("plain_hash:j=.json(conf.json/deep/list/1)", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:j", FetchMode::User).unwrap(),
        Some("boo".to_string())
    );

    instance
        .load("an_enum=.yaml(conf.yaml/1#/value)", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("an_enum", FetchMode::User).unwrap(),
        Some("B".to_string())
    );
}

#[test]
fn json_shape_mismatch_is_load_data_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("conf.json"), r#"{"a": {"m": 1}}"#).unwrap();
    let mut instance = master_instance().with_root_dir(dir.path());
    let err = instance
        .load("plain_hash:x=.json(conf.json/a/0)", CheckPolicy::Yes)
        .unwrap_err();
    assert!(format!("{err}").contains("cannot"));
}

#[test]
fn env_source_skips_when_unset() {
    let mut instance = master_instance();
    std::env::remove_var("ARBOR_TEST_UNSET_VAR");
    instance
        .load(
            "plain_hash:e=seed plain_hash:e=.env(ARBOR_TEST_UNSET_VAR)",
            CheckPolicy::Yes,
        )
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:e", FetchMode::User).unwrap(),
        Some("seed".to_string())
    );
}

#[test]
fn collection_json_method_fills_hash() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("map.json"),
        r#"{"k1": "v1", "k2": "v2"}"#,
    )
    .unwrap();
    let mut instance = master_instance().with_root_dir(dir.path());
    instance
        .load("plain_hash:.json(map.json)", CheckPolicy::Yes)
        .unwrap();
    assert_eq!(
        instance.fetch_path("plain_hash:k1", FetchMode::User).unwrap(),
        Some("v1".to_string())
    );
    assert_eq!(
        instance.fetch_path("plain_hash:k2", FetchMode::User).unwrap(),
        Some("v2".to_string())
    );
}

#[test]
fn dump_load_round_trip() {
    let mut instance = master_instance();
    instance
        .load(
            "plain_hash:foo=boo bounded_list=foo,bar,baz \
             hash_of_nodes:\"foo node\" foo=\"in foo node\" - \
             an_enum=C a_checklist=c2",
            CheckPolicy::Yes,
        )
        .unwrap();
    let dumped = instance.dump().unwrap();

    let mut replay = master_instance();
    replay.load(&dumped, CheckPolicy::Yes).unwrap();
    assert_eq!(replay.dump().unwrap(), dumped);
    assert_eq!(
        replay
            .fetch_path("hash_of_nodes:\"foo node\" foo", FetchMode::User)
            .unwrap(),
        Some("in foo node".to_string())
    );
}

#[test]
fn initial_load_is_idempotent() {
    let program = "plain_hash:foo=boo bounded_list=foo,bar,baz an_enum=C";
    let mut instance = master_instance();
    instance.initial_load_start();
    instance.load(program, CheckPolicy::Yes).unwrap();
    instance.load(program, CheckPolicy::Yes).unwrap();
    instance.initial_load_stop();
    assert_eq!(instance.mode(), LoadMode::Normal);
    assert_eq!(instance.needs_save(), 0);
    assert!(instance.changes().is_empty());
}

#[test]
fn unknown_element_is_reported_with_candidates() {
    let mut instance = master_instance();
    let err = instance.load("bogus=1", CheckPolicy::Yes).unwrap_err();
    let text = format!("{err}");
    assert!(text.contains("bogus"));
    assert!(text.contains("an_enum"));
}
