//! The kernel: entry arena, path index, native modules and configuration.
//!
//! Every operation that touches entries is a method on [`Kernel`]. The methods
//! are spread over the modules that own each concern (`params`, `expr`,
//! `dispatch`, `call`, `pipeline`, `collection`, `store`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use crate::action::ActionTable;
use crate::builtins;
use crate::config::KernelConfig;
use crate::entry::{EntryBuilder, EntryId, EntryRecord};
use crate::error::{Error, Result};
use crate::store;

pub const KERNEL_NAME: &str = "kernel";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder that records a (holder, parameter, requester) triple whose
/// evaluation is in progress; such a holder is skipped by nested lookups.
pub(crate) type Blocked = (EntryId, String, EntryId);

pub struct Kernel {
    entries: Vec<EntryRecord>,
    by_path: HashMap<PathBuf, EntryId>,
    modules: HashMap<String, Rc<ActionTable>>,
    pub(crate) builtins: Rc<ActionTable>,
    config: KernelConfig,
    kernel_entry: EntryId,
    root_override: Option<EntryId>,
    pub(crate) recording: bool,
    pub(crate) record_container: Option<EntryId>,
    pub(crate) record_counter: usize,
    pub(crate) pipeline_counter: usize,
    pub(crate) blocked: Vec<Blocked>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Self {
        let mut kernel = Self {
            entries: Vec::new(),
            by_path: HashMap::new(),
            modules: HashMap::new(),
            builtins: Rc::new(builtins::builtin_actions()),
            recording: config.record_calls,
            config,
            kernel_entry: EntryId(0),
            root_override: None,
            record_container: None,
            record_counter: 0,
            pipeline_counter: 0,
            blocked: Vec::new(),
        };
        kernel.kernel_entry = kernel.create(
            EntryBuilder::named(KERNEL_NAME)
                .param("kernel_version", VERSION)
                .actions(builtins::kernel_actions()),
        );
        kernel
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn kernel_entry(&self) -> EntryId {
        self.kernel_entry
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Register a transient entry.
    pub fn create(&mut self, builder: EntryBuilder) -> EntryId {
        let id = EntryId(self.entries.len());
        let record = builder.into_record();
        if let Some(path) = &record.path {
            self.by_path.insert(path.clone(), id);
        }
        self.entries.push(record);
        id
    }

    /// Handle for the entry stored at `path`, reusing the cached one if any.
    ///
    /// The data file is read lazily, on first parameter access.
    pub fn bypath(
        &mut self,
        path: impl AsRef<Path>,
        name: Option<&str>,
        container: Option<EntryId>,
    ) -> Result<EntryId> {
        let path = store::normalize_path(path.as_ref())?;
        if let Some(id) = self.by_path.get(&path) {
            let id = *id;
            if let Some(container) = container {
                self.record_mut(id).container.get_or_insert(container);
            }
            return Ok(id);
        }
        debug!(path = %path.display(), "registering entry");
        let id = EntryId(self.entries.len());
        self.by_path.insert(path.clone(), id);
        self.entries.push(EntryRecord {
            name: name.map(str::to_string),
            path: Some(path),
            container,
            ..EntryRecord::default()
        });
        Ok(id)
    }

    pub fn cached_bypath(&self, path: &Path) -> Option<EntryId> {
        self.by_path.get(path).copied()
    }

    pub(crate) fn rebind_path(&mut self, id: EntryId, path: PathBuf) {
        if let Some(old) = self.record(id).path.clone() {
            if self.by_path.get(&old) == Some(&id) {
                self.by_path.remove(&old);
            }
        }
        self.by_path.insert(path.clone(), id);
        self.record_mut(id).path = Some(path);
    }

    pub(crate) fn record(&self, id: EntryId) -> &EntryRecord {
        &self.entries[id.0]
    }

    pub(crate) fn record_mut(&mut self, id: EntryId) -> &mut EntryRecord {
        &mut self.entries[id.0]
    }

    pub fn contains(&self, id: EntryId) -> bool {
        id.0 < self.entries.len()
    }

    /// Explicit name, else the last path component, else the handle.
    pub fn name_of(&self, id: EntryId) -> String {
        let record = self.record(id);
        if let Some(name) = &record.name {
            return name.clone();
        }
        record
            .path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("entry{id}"))
    }

    pub fn path_of(&self, id: EntryId) -> Option<&Path> {
        self.record(id).path.as_deref()
    }

    pub fn container_of(&self, id: EntryId) -> Option<EntryId> {
        self.record(id).container
    }

    pub fn is_stored(&self, id: EntryId) -> bool {
        self.record(id).stored
    }

    pub(crate) fn names_of(&self, ids: &[EntryId]) -> Vec<String> {
        ids.iter().map(|id| self.name_of(*id)).collect()
    }

    pub fn register_module(&mut self, name: impl Into<String>, table: ActionTable) {
        self.modules.insert(name.into(), Rc::new(table));
    }

    pub(crate) fn modules(&self) -> &HashMap<String, Rc<ActionTable>> {
        &self.modules
    }

    /// Use an already registered entry as the root collection.
    pub fn set_root_collection(&mut self, root: EntryId) {
        self.root_override = Some(root);
    }

    pub fn root_collection(&mut self) -> Result<EntryId> {
        if let Some(root) = self.root_override {
            return Ok(root);
        }
        let path = self.config.root_collection.clone();
        self.bypath(path, None, None)
    }

    /// Collection receiving new entries; the root collection unless configured.
    pub fn work_collection(&mut self) -> Result<EntryId> {
        match self.config.work_collection.clone() {
            Some(path) => self.bypath(path, None, None),
            None => self.root_collection(),
        }
    }

    /// Turn call recording on or off. Records are created under `container`
    /// when one is given, otherwise they stay transient.
    pub fn set_recording(&mut self, enabled: bool, container: Option<EntryId>) {
        self.recording = enabled;
        self.record_container = container;
    }

    pub fn record_container(&self) -> Option<EntryId> {
        self.record_container
    }

    pub(crate) fn check_entry(&self, id: EntryId) -> Result<EntryId> {
        if self.contains(id) {
            Ok(id)
        } else {
            Err(Error::not_found("entry", id.to_string()))
        }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}
