//! Actions available on every entry, and the kernel entry's own actions.

use std::path::{Path, PathBuf};

use crate::action::{Action, ActionTable, Invocation, Signature};
use crate::dispatch::Origin;
use crate::entry::{EntryBuilder, EntryId};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::pipeline::Pipeline;
use crate::query::Query;
use crate::store::CollisionPolicy;
use crate::value::{Map, Value};

fn entries(ids: Vec<EntryId>) -> Value {
    Value::List(ids.into_iter().map(Value::Entry).collect())
}

fn optional_entry(id: Option<EntryId>) -> Value {
    id.map_or(Value::Null, Value::Entry)
}

fn map_arg(inv: &Invocation, name: &str) -> Result<Map> {
    match inv.value(name)? {
        Value::Map(map) => Ok(map.clone()),
        value if value.is_null() => Ok(Map::new()),
        other => Err(Error::InvalidArgument {
            action: inv.action.clone(),
            param: name.to_string(),
            expected: "a map",
            found: other.kind().to_string(),
        }),
    }
}

fn list_arg(inv: &Invocation, name: &str) -> Result<Vec<Value>> {
    match inv.value(name)? {
        Value::List(items) => Ok(items.clone()),
        value if value.is_null() => Ok(Vec::new()),
        single => Ok(vec![single.clone()]),
    }
}

/// Relative paths given to an entry resolve against the entry's directory.
fn relative_to_entry(kernel: &Kernel, entry: EntryId, path: &str) -> PathBuf {
    let path = Path::new(path);
    match kernel.path_of(entry) {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn get(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let name = inv.text("param_name")?;
    let default = inv.value("default_value")?.clone();
    kernel.get_or(inv.entry, name, default, &inv.ctx)
}

fn set(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.set(inv.entry, inv.text("param_name")?, inv.value("param_value")?.clone())?;
    Ok(Value::Entry(inv.entry))
}

fn plant(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.plant(inv.entry, inv.text("key_path")?, inv.value("value")?.clone())?;
    Ok(Value::Entry(inv.entry))
}

fn pluck(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(kernel.pluck(inv.entry, inv.text("key_path")?)?.unwrap_or_default())
}

fn dig(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let key_path = inv.text("key_path")?;
    match kernel.dig(inv.entry, key_path, &inv.ctx)? {
        Some(value) => Ok(value),
        None if inv.flag("safe")? => Ok(Value::Null),
        None => Err(Error::not_found(
            "parameter",
            format!("{}.{key_path}", kernel.name_of(inv.entry)),
        )),
    }
}

fn substitute(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    match inv.value("template")? {
        Value::Text(template) => kernel.substitute(inv.entry, template, &inv.ctx).map(Value::Text),
        other => Ok(other.clone()),
    }
}

fn own_data(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(Value::Map(kernel.own_data(inv.entry)?.clone()))
}

fn get_name(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(Value::from(kernel.name_of(inv.entry)))
}

fn get_path(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let Some(dir) = kernel.path_of(inv.entry) else {
        return Ok(Value::Null);
    };
    let path = match inv.opt_text("file_name")? {
        Some(file) => dir.join(file),
        None => dir.to_path_buf(),
    };
    Ok(Value::from(path.display().to_string()))
}

fn get_container(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(optional_entry(kernel.container_of(inv.entry)))
}

fn get_kernel(kernel: &mut Kernel, _inv: &Invocation) -> Result<Value> {
    Ok(Value::Entry(kernel.kernel_entry()))
}

fn parents(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(entries(kernel.parents(inv.entry)?))
}

fn call(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let action = inv.text("action_name")?;
    let args = list_arg(inv, "pos_params")?;
    let overrides = map_arg(inv, "edit_dict")?;
    kernel.call(inv.entry, action, args, overrides, &inv.ctx)
}

fn execute(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let pipeline = Pipeline::from_value(inv.value("pipeline")?)?;
    let pipeline_wide = map_arg(inv, "pipeline_wide")?;
    kernel.execute(inv.entry, &pipeline, pipeline_wide, &inv.ctx)
}

fn noop(_kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Ok(inv.value("value")?.clone())
}

fn throw(_kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    Err(Error::raised(inv.value("message")?.to_string()))
}

fn can(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.can(inv.entry, inv.text("action_name")?).map(Value::Bool)
}

fn list_own_actions(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let table = kernel.own_actions(inv.entry)?;
    Ok(Value::List(table.names().map(Value::from).collect()))
}

fn possible_actions(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let names = kernel.possible_actions(inv.entry)?;
    Ok(Value::List(names.into_iter().map(Value::from).collect()))
}

fn help(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let entry = inv.entry;
    let mut out = String::new();
    match inv.opt_text("action_name")? {
        Some(name) => {
            let reached = kernel.reach_action(entry, name)?;
            let origin = match reached.origin {
                Origin::Own => "own".to_string(),
                Origin::Inherited(holder) => format!("inherited from {}", kernel.name_of(holder)),
                Origin::Builtin => "built-in".to_string(),
            };
            out.push_str(&format!("{name}{} ({origin})\n", reached.action.signature));
            if let Some(doc) = &reached.action.doc {
                out.push_str(doc);
                out.push('\n');
            }
        }
        None => {
            out.push_str(&format!("Entry: {}\n", kernel.name_of(entry)));
            if let Some(path) = kernel.path_of(entry) {
                out.push_str(&format!("Path: {}\n", path.display()));
            }
            let table = kernel.own_actions(entry)?;
            if let Some(doc) = &table.doc {
                out.push_str(&format!("Description: {doc}\n"));
            }
            out.push_str("Own actions:\n");
            for name in table.names() {
                if let Some(action) = table.get(name) {
                    out.push_str(&format!("    {name}{}\n", action.signature));
                }
            }
        }
    }
    Ok(Value::from(out))
}

fn save(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let new_path = inv.opt_text("new_path")?.map(Path::new);
    let policy = match inv.opt_text("on_collision")? {
        Some(text) => Some(text.parse::<CollisionPolicy>().map_err(|reason| {
            Error::InvalidArgument {
                action: inv.action.clone(),
                param: "on_collision".into(),
                expected: "force, timestamp or raise",
                found: reason,
            }
        })?),
        None => None,
    };
    kernel.save(inv.entry, new_path, policy).map(Value::Entry)
}

fn remove(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.remove(inv.entry).map(Value::Entry)
}

fn reload(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.reload(inv.entry).map(Value::Entry)
}

fn attach(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let container = inv.entry_arg("container")?;
    kernel.attach(inv.entry, container).map(Value::Entry)
}

fn detach(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.detach(inv.entry).map(Value::Entry)
}

fn bypath(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let path = relative_to_entry(kernel, inv.entry, inv.text("path")?);
    let name = inv.opt_text("name")?;
    kernel.bypath(path, name, None).map(Value::Entry)
}

fn attached_entry(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let name = inv.opt_text("entry_name")?;
    let data = map_arg(inv, "own_data")?;
    let prefix = inv.opt_text("generated_name_prefix")?.unwrap_or("generated_");
    kernel
        .attached_entry(inv.entry, name, data, prefix)
        .map(Value::Entry)
}

fn add_entry_path(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let path = relative_to_entry(kernel, inv.entry, inv.text("new_entry_path")?);
    let name = inv.opt_text("new_entry_name")?;
    kernel.add_entry_path(inv.entry, &path, name).map(Value::Entry)
}

fn remove_entry_name(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel
        .remove_entry_name(inv.entry, inv.text("old_entry_name")?)
        .map(Value::Entry)
}

fn walk(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.walk(inv.entry).map(entries)
}

fn byname(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel
        .byname_in(inv.entry, inv.text("entry_name")?)
        .map(optional_entry)
}

fn byquery(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let query = Query::from_value(inv.value("query")?)?;
    let produce = inv.flag("produce_if_not_found")?;
    kernel
        .byquery_in(inv.entry, &query, produce)
        .map(optional_entry)
}

fn all_byquery(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let query = Query::from_value(inv.value("query")?)?;
    kernel.all_byquery_in(inv.entry, &query).map(entries)
}

/// Actions every entry can reach after its own and inherited ones.
pub(crate) fn builtin_actions() -> ActionTable {
    let none = || Signature::default();
    ActionTable::new()
        .with(Action::native("get", Signature::new(["param_name"]).optional("default_value", Value::Null), get)
            .with_doc("Value of a parameter, or the default when it cannot be found."))
        .with(Action::native("set", Signature::new(["param_name", "param_value"]), set)
            .with_doc("Set an own parameter and return the entry."))
        .with(Action::native("plant", Signature::new(["key_path", "value"]), plant)
            .with_doc("Set a value at a dotted path of own data."))
        .with(Action::native("pluck", Signature::new(["key_path"]), pluck)
            .with_doc("Remove and return the value at a dotted path of own data."))
        .with(Action::native("dig", Signature::new(["key_path"]).optional("safe", false), dig))
        .with(Action::native("substitute", Signature::new(["template"]), substitute)
            .with_doc("Replace #{name}# placeholders with parameter values."))
        .with(Action::native("own_data", none(), own_data))
        .with(Action::native("get_name", none(), get_name))
        .with(Action::native("get_path", Signature::default().optional("file_name", Value::Null), get_path))
        .with(Action::native("get_container", none(), get_container))
        .with(Action::native("get_kernel", none(), get_kernel))
        .with(Action::native("parents", none(), parents))
        .with(Action::native(
            "call",
            Signature::new(["action_name"])
                .optional("pos_params", Value::List(Vec::new()))
                .optional("edit_dict", Value::Map(Map::new())),
            call,
        ))
        .with(Action::native(
            "execute",
            Signature::new(["pipeline"]).optional("pipeline_wide", Value::Map(Map::new())),
            execute,
        )
        .with_doc("Run a pipeline of calls, passing results between steps."))
        .with(Action::native("noop", Signature::default().optional("value", Value::Null), noop))
        .with(Action::native(
            "throw",
            Signature::default().optional("message", "Throwing an error as requested"),
            throw,
        ))
        .with(Action::native("can", Signature::new(["action_name"]), can))
        .with(Action::native("list_own_actions", none(), list_own_actions))
        .with(Action::native("possible_actions", none(), possible_actions))
        .with(Action::native("help", Signature::default().optional("action_name", Value::Null), help))
        .with(Action::native(
            "save",
            Signature::default()
                .optional("new_path", Value::Null)
                .optional("on_collision", Value::Null),
            save,
        )
        .with_doc("Store own parameters as data_axs.json."))
        .with(Action::native("remove", none(), remove)
            .with_doc("Detach the entry and delete its directory."))
        .with(Action::native("reload", none(), reload))
        .with(Action::native("attach", Signature::default().optional("container", Value::Null), attach))
        .with(Action::native("detach", none(), detach))
        .with(Action::native("bypath", Signature::new(["path"]).optional("name", Value::Null), bypath))
        .with(Action::native(
            "attached_entry",
            Signature::default()
                .optional("entry_name", Value::Null)
                .optional("own_data", Value::Map(Map::new()))
                .optional("generated_name_prefix", "generated_"),
            attached_entry,
        ))
        .with(Action::native(
            "add_entry_path",
            Signature::new(["new_entry_path"]).optional("new_entry_name", Value::Null),
            add_entry_path,
        ))
        .with(Action::native("remove_entry_name", Signature::new(["old_entry_name"]), remove_entry_name))
        .with(Action::native("walk", none(), walk))
        .with(Action::native("byname", Signature::new(["entry_name"]), byname))
        .with(Action::native(
            "byquery",
            Signature::new(["query"]).optional("produce_if_not_found", true),
            byquery,
        ))
        .with(Action::native("all_byquery", Signature::new(["query"]), all_byquery))
}

fn kernel_byname(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    kernel.byname(inv.text("entry_name")?).map(optional_entry)
}

fn kernel_byquery(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let query = Query::from_value(inv.value("query")?)?;
    let produce = inv.flag("produce_if_not_found")?;
    kernel.byquery(&query, produce).map(optional_entry)
}

fn kernel_all_byquery(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let query = Query::from_value(inv.value("query")?)?;
    let root = kernel.root_collection()?;
    kernel.all_byquery_in(root, &query).map(entries)
}

fn kernel_bypath(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let name = inv.opt_text("name")?;
    kernel.bypath(inv.text("path")?, name, None).map(Value::Entry)
}

fn version(kernel: &mut Kernel, _inv: &Invocation) -> Result<Value> {
    Ok(Value::from(kernel.version()))
}

fn root_collection(kernel: &mut Kernel, _inv: &Invocation) -> Result<Value> {
    kernel.root_collection().map(Value::Entry)
}

fn work_collection(kernel: &mut Kernel, _inv: &Invocation) -> Result<Value> {
    kernel.work_collection().map(Value::Entry)
}

fn record_container(kernel: &mut Kernel, _inv: &Invocation) -> Result<Value> {
    Ok(optional_entry(kernel.record_container()))
}

fn fresh_entry(kernel: &mut Kernel, inv: &Invocation) -> Result<Value> {
    let mut builder = EntryBuilder::new().params(map_arg(inv, "own_data")?);
    if let Some(path) = inv.opt_text("entry_path")? {
        builder = builder.path(crate::store::normalize_path(Path::new(path))?);
    }
    for parent in list_arg(inv, "parents")? {
        builder = builder.parent(parent);
    }
    if let Some(container) = inv.entry_arg("container")? {
        builder = builder.container(container);
    }
    Ok(Value::Entry(kernel.create(builder)))
}

/// Own actions of the kernel entry; name and query lookups go through the
/// root collection.
pub(crate) fn kernel_actions() -> ActionTable {
    ActionTable::new()
        .with(Action::native("byname", Signature::new(["entry_name"]), kernel_byname))
        .with(Action::native(
            "byquery",
            Signature::new(["query"]).optional("produce_if_not_found", true),
            kernel_byquery,
        ))
        .with(Action::native("all_byquery", Signature::new(["query"]), kernel_all_byquery))
        .with(Action::native("bypath", Signature::new(["path"]).optional("name", Value::Null), kernel_bypath))
        .with(Action::native("version", Signature::default(), version))
        .with(Action::native("core_collection", Signature::default(), root_collection))
        .with(Action::native("root_collection", Signature::default(), root_collection))
        .with(Action::native("work_collection", Signature::default(), work_collection))
        .with(Action::native("record_container", Signature::default(), record_container))
        .with(Action::native(
            "fresh_entry",
            Signature::default()
                .optional("entry_path", Value::Null)
                .optional("own_data", Value::Map(Map::new()))
                .optional("parents", Value::List(Vec::new()))
                .optional("container", Value::Null),
            fresh_entry,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use serde_json::json;

    fn call(kernel: &mut Kernel, entry: EntryId, action: &str, args: serde_json::Value) -> Result<Value> {
        let Value::List(args) = Value::from(args) else { unreachable!() };
        kernel.call(entry, action, args, Map::new(), &Context::new())
    }

    #[test]
    fn get_falls_back_to_default() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new().param("x", 1));
        assert_eq!(call(&mut kernel, entry, "get", json!(["x"])).unwrap(), Value::Int(1));
        assert_eq!(call(&mut kernel, entry, "get", json!(["y", 7])).unwrap(), Value::Int(7));
        assert_eq!(call(&mut kernel, entry, "get", json!(["y"])).unwrap(), Value::Null);
    }

    #[test]
    fn set_returns_entry_for_chaining() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        assert_eq!(call(&mut kernel, entry, "set", json!(["x", 3])).unwrap(), Value::Entry(entry));
        assert_eq!(kernel.get_raw(entry, "x").unwrap(), Some(Value::Int(3)));
    }

    #[test]
    fn dig_is_strict_unless_safe() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        assert!(call(&mut kernel, entry, "dig", json!(["a.b"])).unwrap_err().is_not_found());
        assert_eq!(call(&mut kernel, entry, "dig", json!(["a.b", true])).unwrap(), Value::Null);
    }

    #[test]
    fn throw_raises_message() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let err = call(&mut kernel, entry, "throw", json!(["stop here"])).unwrap_err();
        assert_eq!(err.to_string(), "stop here");
    }

    #[test]
    fn call_builtin_forwards_arguments() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new().param("x", "y"));
        let out = call(&mut kernel, entry, "call", json!(["get", ["x"]])).unwrap();
        assert_eq!(out, Value::from("y"));
    }

    #[test]
    fn kernel_reports_version() {
        let mut kernel = Kernel::default();
        let root = kernel.kernel_entry();
        assert_eq!(call(&mut kernel, root, "version", json!([])).unwrap(), Value::from(kernel.version()));
    }

    #[test]
    fn help_describes_actions() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let Value::Text(text) = call(&mut kernel, entry, "help", json!(["get"])).unwrap() else {
            panic!("help returns text");
        };
        assert!(text.starts_with("get(param_name, default_value=null) (built-in)"));
    }

    #[test]
    fn fresh_entry_builds_transient_entries() {
        let mut kernel = Kernel::default();
        let root = kernel.kernel_entry();
        let made = call(&mut kernel, root, "fresh_entry", json!([null, {"n": 2}])).unwrap();
        let made = made.as_entry().unwrap();
        assert_eq!(kernel.get_raw(made, "n").unwrap(), Some(Value::Int(2)));
    }
}
