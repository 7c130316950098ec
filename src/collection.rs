//! Collections: entries whose `contained_entries` map names children.
//!
//! Walking is depth first and restartable; name and query lookups are linear
//! scans over a walk. Queries with positive tags may fall back to producer
//! rules advertised by walked entries.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::entry::{EntryBuilder, EntryId};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{CONTAINED_KEY, PRODUCER_RULES_KEY, TAGS_KEY};
use crate::query::Query;
use crate::value::{Map, Value};

struct Frame {
    collection: EntryId,
    children: Vec<(String, Value)>,
    next: usize,
}

/// Depth-first iterator over a collection tree.
///
/// The cursor holds no borrow of the kernel, so a walk can be interleaved
/// with other kernel operations and stopped at any point.
pub struct WalkCursor {
    root: EntryId,
    started: bool,
    stack: Vec<Frame>,
}

impl WalkCursor {
    pub fn new(root: EntryId) -> Self {
        Self {
            root,
            started: false,
            stack: Vec::new(),
        }
    }

    pub fn next(&mut self, kernel: &mut Kernel) -> Result<Option<EntryId>> {
        if !self.started {
            self.started = true;
            if kernel.is_collection(self.root)? {
                self.stack.push(kernel.frame(self.root)?);
            }
            return Ok(Some(self.root));
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };
            let Some((name, raw)) = frame.children.get(frame.next).cloned() else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            let collection = frame.collection;
            let child = kernel.contained_entry(collection, &name, &raw)?;
            if kernel.is_collection(child)? {
                if self.stack.iter().any(|frame| frame.collection == child) {
                    let mut chain: Vec<EntryId> =
                        self.stack.iter().map(|frame| frame.collection).collect();
                    chain.push(child);
                    return Err(Error::CycleDetected {
                        chain: kernel.names_of(&chain),
                    });
                }
                self.stack.push(kernel.frame(child)?);
            }
            return Ok(Some(child));
        }
    }
}

fn generated_name(prefix: &str) -> String {
    format!("{prefix}{}", Local::now().format("%Y_%m_%d_%Hh%Mm%Ss_%f"))
}

impl Kernel {
    /// Whether the entry's own data declares children.
    pub fn is_collection(&mut self, entry: EntryId) -> Result<bool> {
        Ok(self.own_data(entry)?.contains_key(CONTAINED_KEY))
    }

    fn frame(&mut self, collection: EntryId) -> Result<Frame> {
        let declared = self.own_data(collection)?.get(CONTAINED_KEY).cloned();
        let children = match declared {
            Some(Value::Map(children)) => children.into_iter().collect(),
            Some(other) => {
                warn!(
                    collection = %self.name_of(collection),
                    kind = other.kind(),
                    "`{CONTAINED_KEY}` is not a map, ignoring"
                );
                Vec::new()
            }
            None => Vec::new(),
        };
        Ok(Frame {
            collection,
            children,
            next: 0,
        })
    }

    /// Resolve one `contained_entries` value: a path relative to the
    /// collection, or an entry handle.
    fn contained_entry(&mut self, collection: EntryId, name: &str, raw: &Value) -> Result<EntryId> {
        let invalid = |kernel: &Kernel, reason: String| Error::InvalidChild {
            collection: kernel.name_of(collection),
            name: name.to_string(),
            reason,
        };
        let value = self.evaluate(collection, raw, &Context::new())?;
        match value.as_ref() {
            Value::Entry(id) => Ok(*id),
            Value::Text(relative) => {
                let relative = Path::new(relative);
                let path = if relative.is_absolute() {
                    relative.to_path_buf()
                } else {
                    let Some(dir) = self.path_of(collection) else {
                        return Err(invalid(&*self, "collection has no path".into()));
                    };
                    dir.join(relative)
                };
                self.bypath(path, Some(name), Some(collection))
            }
            other => {
                let reason = format!("expected a path or an entry, found {}", other.kind());
                Err(invalid(&*self, reason))
            }
        }
    }

    /// All entries of the tree rooted at `collection`, in walk order.
    pub fn walk(&mut self, collection: EntryId) -> Result<Vec<EntryId>> {
        let mut cursor = WalkCursor::new(collection);
        let mut out = Vec::new();
        while let Some(entry) = cursor.next(self)? {
            out.push(entry);
        }
        Ok(out)
    }

    /// First entry named `name` in the root collection.
    pub fn byname(&mut self, name: &str) -> Result<Option<EntryId>> {
        let root = self.root_collection()?;
        self.byname_in(root, name)
    }

    pub fn byname_in(&mut self, collection: EntryId, name: &str) -> Result<Option<EntryId>> {
        let mut cursor = WalkCursor::new(collection);
        while let Some(entry) = cursor.next(self)? {
            if self.name_of(entry) == name {
                return Ok(Some(entry));
            }
        }
        debug!(name, "no entry by that name");
        Ok(None)
    }

    /// First match of `query` in the root collection.
    pub fn byquery(&mut self, query: &Query, produce_if_not_found: bool) -> Result<Option<EntryId>> {
        let root = self.root_collection()?;
        self.byquery_in(root, query, produce_if_not_found)
    }

    pub fn byquery_in(
        &mut self,
        collection: EntryId,
        query: &Query,
        produce_if_not_found: bool,
    ) -> Result<Option<EntryId>> {
        let mut cursor = WalkCursor::new(collection);
        while let Some(entry) = cursor.next(self)? {
            if query.matches(self, entry)? {
                return Ok(Some(entry));
            }
        }
        if produce_if_not_found && !query.positive_tags().is_empty() {
            return self.produce(collection, query);
        }
        Ok(None)
    }

    pub fn all_byquery_in(&mut self, collection: EntryId, query: &Query) -> Result<Vec<EntryId>> {
        let mut cursor = WalkCursor::new(collection);
        let mut out = Vec::new();
        while let Some(entry) = cursor.next(self)? {
            if query.matches(self, entry)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Ask producer rules advertised in the tree for an entry matching the
    /// query's positive tags. A rule is `[tags, producer, action, extra?]`
    /// and applies when its tags are a subset of the query's.
    fn produce(&mut self, collection: EntryId, query: &Query) -> Result<Option<EntryId>> {
        let wanted = query.positive_tags();
        let mut cursor = WalkCursor::new(collection);
        while let Some(advertiser) = cursor.next(self)? {
            let Some(Value::List(rules)) =
                self.lookup(advertiser, PRODUCER_RULES_KEY, &Context::new())?
            else {
                continue;
            };
            for rule in rules {
                let Some((tags, producer, action, extra)) = split_rule(&rule) else {
                    warn!(advertiser = %self.name_of(advertiser), "skipping malformed producer rule");
                    continue;
                };
                if !tags.iter().all(|tag| wanted.contains(&tag.as_str())) {
                    continue;
                }

                let mut params = extra;
                params.extend(query.equalities());
                params.insert(
                    TAGS_KEY.to_string(),
                    Value::List(wanted.iter().map(|tag| Value::from(*tag)).collect()),
                );
                let overrides = params
                    .into_iter()
                    .map(|(key, value)| (key, Value::escaped(value)))
                    .collect();
                info!(
                    query = %query,
                    producer = %self.name_of(producer),
                    action = %action,
                    "producing entry"
                );
                let ctx = Context::new().with_entry(advertiser);
                match self.call(producer, &action, Vec::new(), overrides, &ctx)? {
                    Value::Entry(produced) => return Ok(Some(produced)),
                    other => warn!(
                        producer = %self.name_of(producer),
                        kind = other.kind(),
                        "producer did not return an entry"
                    ),
                }
            }
        }
        Ok(None)
    }

    /// List `entry` in the container's children and save the container.
    pub fn attach(&mut self, entry: EntryId, container: Option<EntryId>) -> Result<EntryId> {
        let container = match container {
            Some(container) => container,
            None => self.work_collection()?,
        };
        let path = self
            .path_of(entry)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Unstorable {
                entry: self.name_of(entry),
            })?;
        let name = self.name_of(entry);
        self.add_entry_path(container, &path, Some(&name))?;
        self.record_mut(entry).container = Some(container);
        Ok(entry)
    }

    pub fn detach(&mut self, entry: EntryId) -> Result<EntryId> {
        match self.container_of(entry) {
            Some(container) => {
                let name = self.name_of(entry);
                self.remove_entry_name(container, &name)?;
                self.record_mut(entry).container = None;
            }
            None => warn!(entry = %self.name_of(entry), "entry is not attached"),
        }
        Ok(entry)
    }

    /// Add a child by path; paths inside the collection are stored relative.
    pub fn add_entry_path(
        &mut self,
        collection: EntryId,
        entry_path: &Path,
        name: Option<&str>,
    ) -> Result<EntryId> {
        let stored_path = self.relative_to(collection, entry_path);
        let name = match name {
            Some(name) => name.to_string(),
            None => stored_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::not_found("entry name", entry_path.display().to_string()))?,
        };
        let stored = Value::from(stored_path.to_string_lossy().into_owned());

        let existing = self
            .own_data(collection)?
            .get(CONTAINED_KEY)
            .and_then(Value::as_map)
            .and_then(|children| children.get(&name))
            .cloned();
        match existing {
            Some(current) if current == stored => {
                warn!(collection = %self.name_of(collection), name, "already attached");
                return Ok(collection);
            }
            Some(current) => {
                return Err(Error::PersistenceConflict {
                    path: self.path_of(collection).map(Path::to_path_buf).unwrap_or_default(),
                    reason: format!("`{name}` already refers to {}", current.canonical()),
                });
            }
            None => {}
        }

        let data = self.own_data_mut(collection)?;
        match data.get_mut(CONTAINED_KEY) {
            Some(Value::Map(children)) => {
                children.insert(name, stored);
            }
            _ => {
                let mut children = Map::new();
                children.insert(name, stored);
                data.insert(CONTAINED_KEY.to_string(), Value::Map(children));
            }
        }
        self.save_if_stored_path(collection)?;
        Ok(collection)
    }

    pub fn remove_entry_name(&mut self, collection: EntryId, name: &str) -> Result<EntryId> {
        let removed = match self.own_data_mut(collection)?.get_mut(CONTAINED_KEY) {
            Some(Value::Map(children)) => children.shift_remove(name),
            _ => None,
        };
        if removed.is_none() {
            warn!(collection = %self.name_of(collection), name, "no such child");
            return Ok(collection);
        }
        self.save_if_stored_path(collection)?;
        Ok(collection)
    }

    /// Fresh entry located inside `collection`, with the collection as its
    /// container. It is listed in the collection on first save.
    pub fn attached_entry(
        &mut self,
        collection: EntryId,
        name: Option<&str>,
        data: Map,
        generated_prefix: &str,
    ) -> Result<EntryId> {
        let name = name.map_or_else(|| generated_name(generated_prefix), str::to_string);
        let dir = self
            .path_of(collection)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Unstorable {
                entry: self.name_of(collection),
            })?;
        let path = crate::store::normalize_path(&dir.join(&name))?;
        Ok(self.create(
            EntryBuilder::named(name)
                .path(path)
                .params(data)
                .container(collection),
        ))
    }

    fn relative_to(&self, collection: EntryId, path: &Path) -> PathBuf {
        match self.path_of(collection) {
            Some(dir) if path.is_absolute() => path
                .strip_prefix(dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.to_path_buf()),
            _ => path.to_path_buf(),
        }
    }

    fn save_if_stored_path(&mut self, collection: EntryId) -> Result<()> {
        if self.path_of(collection).is_some() {
            self.save(collection, None, None)?;
        }
        Ok(())
    }
}

fn split_rule(rule: &Value) -> Option<(Vec<String>, EntryId, String, Map)> {
    let parts = rule.as_list()?;
    let tags = parts
        .first()?
        .as_list()?
        .iter()
        .map(|tag| tag.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    let producer = parts.get(1)?.as_entry()?;
    let action = parts.get(2)?.as_str()?.to_string();
    let extra = match parts.get(3) {
        Some(Value::Map(extra)) => extra.clone(),
        _ => Map::new(),
    };
    Some((tags, producer, action, extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, Signature};
    use serde_json::json;
    use tempfile::tempdir;

    fn map(json: serde_json::Value) -> Map {
        match Value::from(json) {
            Value::Map(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn walk_is_depth_first_in_declared_order() {
        let mut kernel = Kernel::default();
        let c = kernel.create(EntryBuilder::named("C"));
        let d = kernel.create(EntryBuilder::named("D"));
        let b = kernel.create(EntryBuilder::named("B").param(CONTAINED_KEY, Value::from(map(json!({})))));
        kernel.plant(b, "contained_entries.C", c).unwrap();
        let a = kernel.create(EntryBuilder::named("A"));
        kernel.plant(a, "contained_entries.B", b).unwrap();
        kernel.plant(a, "contained_entries.D", d).unwrap();
        let names: Vec<String> = kernel
            .walk(a)
            .unwrap()
            .into_iter()
            .map(|id| kernel.name_of(id))
            .collect();
        assert_eq!(names, ["A", "B", "C", "D"]);
    }

    #[test]
    fn cursor_can_stop_early_and_restart() {
        let mut kernel = Kernel::default();
        let x = kernel.create(EntryBuilder::named("x"));
        let root = kernel.create(EntryBuilder::named("root"));
        kernel.plant(root, "contained_entries.x", x).unwrap();
        let mut cursor = WalkCursor::new(root);
        assert_eq!(cursor.next(&mut kernel).unwrap(), Some(root));
        let mut again = WalkCursor::new(root);
        assert_eq!(again.next(&mut kernel).unwrap(), Some(root));
        assert_eq!(again.next(&mut kernel).unwrap(), Some(x));
        assert_eq!(again.next(&mut kernel).unwrap(), None);
    }

    #[test]
    fn byquery_and_all_byquery_scan_the_tree() {
        let mut kernel = Kernel::default();
        let first = kernel.create(EntryBuilder::named("first").params(map(json!({"tags": ["a", "b"], "b": 5}))));
        let second = kernel.create(EntryBuilder::named("second").params(map(json!({"tags": ["a"], "b": 5}))));
        let root = kernel.create(EntryBuilder::named("root"));
        kernel.plant(root, "contained_entries.first", first).unwrap();
        kernel.plant(root, "contained_entries.second", second).unwrap();
        kernel.set_root_collection(root);

        let query = Query::parse("a,b=5").unwrap();
        assert_eq!(kernel.byquery(&query, false).unwrap(), Some(first));
        assert_eq!(kernel.all_byquery_in(root, &query).unwrap(), [first, second]);
        assert_eq!(kernel.byname("second").unwrap(), Some(second));
        assert_eq!(kernel.byname("third").unwrap(), None);
    }

    #[test]
    fn producer_rules_create_missing_entries() {
        let mut kernel = Kernel::default();
        let producer = kernel.create(EntryBuilder::named("maker").action(Action::native(
            "make",
            Signature::new(["tags", "size"]),
            |kernel, inv| {
                let entry = kernel.create(
                    EntryBuilder::named("made")
                        .param("tags", inv.value("tags")?.clone())
                        .param("size", inv.value("size")?.clone()),
                );
                Ok(Value::Entry(entry))
            },
        )));
        let root = kernel.create(EntryBuilder::named("root").param(
            PRODUCER_RULES_KEY,
            Value::List(vec![Value::List(vec![
                Value::from(json!(["thing"])),
                Value::Entry(producer),
                Value::from("make"),
            ])]),
        ));
        let query = Query::parse("thing,extra,size=3").unwrap();
        let made = kernel.byquery_in(root, &query, true).unwrap().unwrap();
        assert_eq!(kernel.name_of(made), "made");
        let data = kernel.own_data(made).unwrap().clone();
        assert_eq!(data["size"], Value::Int(3));
        assert_eq!(data["tags"], Value::from(json!(["thing", "extra"])));
        assert_eq!(kernel.byquery_in(root, &Query::parse("!thing,other").unwrap(), false).unwrap(), None);
    }

    #[test]
    fn stored_collection_lists_attached_children() {
        let dir = tempdir().unwrap();
        let mut kernel = Kernel::default();
        let root = kernel.bypath(dir.path().join("root"), None, None).unwrap();
        kernel.set(root, CONTAINED_KEY, Value::Map(Map::new())).unwrap();
        kernel.save(root, None, None).unwrap();

        let child = kernel
            .attached_entry(root, Some("child"), map(json!({"n": 1})), "generated_")
            .unwrap();
        kernel.save(child, None, None).unwrap();
        assert_eq!(
            kernel.dig(root, "contained_entries.child", &Context::new()).unwrap(),
            Some(Value::from("child"))
        );

        let mut fresh = Kernel::default();
        let reopened = fresh.bypath(dir.path().join("root"), None, None).unwrap();
        let names: Vec<String> = fresh
            .walk(reopened)
            .unwrap()
            .into_iter()
            .map(|id| fresh.name_of(id))
            .collect();
        assert_eq!(names, ["root", "child"]);

        kernel.detach(child).unwrap();
        assert_eq!(kernel.dig(root, "contained_entries.child", &Context::new()).unwrap(), None);
    }

    #[test]
    fn conflicting_child_name_is_refused() {
        let mut kernel = Kernel::default();
        let root = kernel.create(EntryBuilder::named("root"));
        kernel.add_entry_path(root, Path::new("/somewhere/a"), Some("a")).unwrap();
        kernel.add_entry_path(root, Path::new("/somewhere/a"), Some("a")).unwrap();
        let err = kernel
            .add_entry_path(root, Path::new("/elsewhere/a"), Some("a"))
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceConflict { .. }));
    }
}
