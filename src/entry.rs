//! Entry handles and the per-entry state kept in the kernel arena.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::action::{Action, ActionTable};
use crate::markers::PARENTS_KEY;
use crate::value::{Map, Value};

/// Stable handle of an entry inside one kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ParentRef {
    Resolved(EntryId),
    Pending(Value),
    /// Placeholder while a pending reference is being resolved.
    Resolving,
}

#[derive(Debug, Default)]
pub(crate) struct EntryRecord {
    pub name: Option<String>,
    pub path: Option<PathBuf>,
    /// Own parameters; `None` until first loaded from storage.
    pub params: Option<Map>,
    pub parents: Option<Vec<ParentRef>>,
    pub container: Option<EntryId>,
    pub actions: OnceCell<Rc<ActionTable>>,
    pub call_cache: HashMap<String, CachedCall>,
    /// True while the on-disk data file reflects this entry.
    pub stored: bool,
}

/// Memoized outcome of a deterministic call.
#[derive(Clone, Debug)]
pub(crate) struct CachedCall {
    pub value: Value,
    pub record: Option<EntryId>,
}

impl EntryRecord {
    pub fn invalidate(&mut self) {
        self.params = None;
        self.parents = None;
        self.actions = OnceCell::new();
        self.call_cache.clear();
        self.stored = false;
    }
}

/// Description of a transient entry, registered with [`crate::Kernel::create`].
#[derive(Debug, Default)]
pub struct EntryBuilder {
    pub(crate) name: Option<String>,
    pub(crate) path: Option<PathBuf>,
    pub(crate) params: Map,
    pub(crate) parents: Vec<Value>,
    pub(crate) actions: Option<ActionTable>,
    pub(crate) container: Option<EntryId>,
}

impl EntryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Storage location used by a later `save`.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Map) -> Self {
        self.params.extend(params);
        self
    }

    /// Append a parent: an entry handle, a name, or an expression.
    pub fn parent(mut self, parent: impl Into<Value>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.get_or_insert_with(ActionTable::new).insert(action);
        self
    }

    pub fn actions(mut self, table: ActionTable) -> Self {
        self.actions = Some(table);
        self
    }

    pub fn container(mut self, container: EntryId) -> Self {
        self.container = Some(container);
        self
    }

    pub(crate) fn into_record(self) -> EntryRecord {
        let mut params = self.params;
        if !self.parents.is_empty() {
            params.insert(PARENTS_KEY.to_string(), Value::List(self.parents));
        }
        let actions = OnceCell::new();
        if let Some(table) = self.actions {
            let _ = actions.set(Rc::new(table));
        }
        EntryRecord {
            name: self.name,
            path: self.path,
            params: Some(params),
            parents: None,
            container: self.container,
            actions,
            call_cache: HashMap::new(),
            stored: false,
        }
    }
}
