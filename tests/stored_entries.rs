// End-to-end checks against collections stored in a temporary directory.

use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use axs::{
    CollisionPolicy, Context, EntryId, Error, Kernel, KernelConfig, Map, Pipeline, Query, Value,
};

fn map(json: serde_json::Value) -> Map {
    match Value::from(json) {
        Value::Map(map) => map,
        other => panic!("expected a map, got {other}"),
    }
}

fn kernel_for(dir: &Path) -> Kernel {
    Kernel::new(KernelConfig {
        root_collection: dir.join("core"),
        ..KernelConfig::default()
    })
}

/// A root collection `core` holding `be_like`, which has a script action.
fn seed(dir: &Path) {
    let mut kernel = kernel_for(dir);
    let core = kernel.root_collection().unwrap();
    kernel.set(core, "contained_entries", Value::Map(Map::new())).unwrap();
    kernel.save(core, None, None).unwrap();

    let be_like = kernel
        .attached_entry(
            core,
            Some("be_like"),
            map(json!({"tags": ["meme"], "person": "Bill", "quality": "smart"})),
            "generated_",
        )
        .unwrap();
    kernel.save(be_like, None, None).unwrap();

    let code = json!({
        "_doc": "Be like Bill.",
        "meme": {
            "params": ["does", {"quality": "smart"}],
            "body": ["^^", "substitute", "This is #{person}#. #{person}# #{does}#. #{person}# is #{quality}#."],
            "doc": "Compose the meme text."
        }
    });
    fs::write(
        dir.join("core/be_like/code_axs.json"),
        serde_json::to_string_pretty(&code).unwrap(),
    )
    .unwrap();
}

#[test]
fn stored_entry_survives_a_fresh_kernel() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());

    let text = fs::read_to_string(dir.path().join("core/data_axs.json")).unwrap();
    assert!(text.ends_with("}\n"));
    assert!(text.contains("\"be_like\": \"be_like\""));

    let mut kernel = kernel_for(dir.path());
    let be_like = kernel.byname("be_like").unwrap().unwrap();
    let ctx = Context::new();
    let out = kernel
        .call(be_like, "meme", vec![Value::from("codes")], Map::new(), &ctx)
        .unwrap();
    assert_eq!(out, Value::from("This is Bill. Bill codes. Bill is smart."));

    let mut overrides = Map::new();
    overrides.insert("person".into(), Value::from("Mary"));
    let out = kernel
        .call(be_like, "meme", vec![Value::from("writes")], overrides, &ctx)
        .unwrap();
    assert_eq!(out, Value::from("This is Mary. Mary writes. Mary is smart."));
}

#[test]
fn pipeline_reaches_stored_entry_through_the_kernel() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());
    let mut kernel = kernel_for(dir.path());
    let pipeline = Pipeline::from_value(&Value::from(json!([
        ["byname", ["be_like"]],
        ["meme", ["dances"], {"quality": "graceful"}]
    ])))
    .unwrap();
    let owner = kernel.kernel_entry();
    let out = kernel
        .execute(owner, &pipeline, Map::new(), &Context::new())
        .unwrap();
    assert_eq!(out, Value::from("This is Bill. Bill dances. Bill is graceful."));
}

fn add_tagged(kernel: &mut Kernel, core: EntryId, name: &str, data: serde_json::Value) -> EntryId {
    let entry = kernel
        .attached_entry(core, Some(name), map(data), "generated_")
        .unwrap();
    kernel.save(entry, None, None).unwrap();
    entry
}

#[test]
fn query_filters_stored_entries() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());
    {
        let mut kernel = kernel_for(dir.path());
        let core = kernel.root_collection().unwrap();
        add_tagged(&mut kernel, core, "with_c", json!({"tags": ["a", "b", "c"], "b": 5}));
        add_tagged(&mut kernel, core, "wrong_b", json!({"tags": ["a", "b"], "b": 6}));
        add_tagged(&mut kernel, core, "wanted", json!({"tags": ["a", "b"], "b": 5}));
    }

    let mut kernel = kernel_for(dir.path());
    let found = kernel
        .byquery(&Query::parse("a,!c,b=5").unwrap(), false)
        .unwrap()
        .unwrap();
    assert_eq!(kernel.name_of(found), "wanted");

    let root = kernel.root_collection().unwrap();
    let tagged_a = kernel
        .all_byquery_in(root, &Query::parse("a").unwrap())
        .unwrap();
    let names: Vec<String> = tagged_a.into_iter().map(|id| kernel.name_of(id)).collect();
    assert_eq!(names, ["with_c", "wrong_b", "wanted"]);
    assert_eq!(kernel.byquery(&Query::parse("a,b=7").unwrap(), true).unwrap(), None);
}

#[test]
fn remove_keeps_parameters_for_a_later_save() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());
    let mut kernel = kernel_for(dir.path());
    let be_like = kernel.byname("be_like").unwrap().unwrap();
    let stored = dir.path().join("core/be_like");

    kernel.remove(be_like).unwrap();
    assert!(!stored.exists());
    assert_eq!(kernel.byname("be_like").unwrap(), None);
    assert_eq!(
        kernel.get_raw(be_like, "person").unwrap(),
        Some(Value::from("Bill"))
    );

    kernel.save(be_like, None, None).unwrap();
    assert!(stored.join("data_axs.json").is_file());
}

#[test]
fn collision_policies_guard_existing_entries() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());
    let mut kernel = kernel_for(dir.path());
    let other = kernel.bypath(dir.path().join("scratch"), None, None).unwrap();
    kernel.set(other, "x", 1).unwrap();

    let target = dir.path().join("core/be_like");
    let err = kernel
        .save(other, Some(target.as_path()), Some(CollisionPolicy::Raise))
        .unwrap_err();
    assert!(matches!(err, Error::PersistenceConflict { .. }));

    kernel
        .save(other, Some(target.as_path()), Some(CollisionPolicy::Timestamp))
        .unwrap();
    let saved_at = kernel.path_of(other).unwrap().to_path_buf();
    assert_ne!(saved_at, target);
    assert!(saved_at.join("data_axs.json").is_file());
    assert!(target.join("data_axs.json").is_file());
}

#[test]
fn entry_handles_are_pickled_by_name() {
    let dir = TempDir::new().unwrap();
    seed(dir.path());
    {
        let mut kernel = kernel_for(dir.path());
        let be_like = kernel.byname("be_like").unwrap().unwrap();
        let core = kernel.root_collection().unwrap();
        let fan = kernel
            .attached_entry(core, Some("fan"), Map::new(), "generated_")
            .unwrap();
        kernel.set(fan, "_parent_entries", Value::List(vec![Value::Entry(be_like)])).unwrap();
        kernel.save(fan, None, None).unwrap();
    }

    let text = fs::read_to_string(dir.path().join("core/fan/data_axs.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["_parent_entries"], json!([["^", "byname", "be_like"]]));

    let mut kernel = kernel_for(dir.path());
    let fan = kernel.byname("fan").unwrap().unwrap();
    assert_eq!(
        kernel.get(fan, "person", &Context::new()).unwrap(),
        Value::from("Bill")
    );
    let out = kernel
        .call(fan, "meme", vec![Value::from("reads")], Map::new(), &Context::new())
        .unwrap();
    assert_eq!(out, Value::from("This is Bill. Bill reads. Bill is smart."));
}

#[test]
fn escaped_values_are_returned_as_data() {
    let mut kernel = Kernel::default();
    let entry = kernel.create(axs::EntryBuilder::named("e"));
    let inner = json!(["^^", "get", "nothing_here"]);
    let escaped = Value::from(json!({"AS^IS": inner.clone()}));
    let once = kernel
        .evaluate(entry, &escaped, &Context::new())
        .unwrap()
        .into_owned();
    assert_eq!(once, Value::from(inner));
}
