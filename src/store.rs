//! File-system persistence: one directory per entry holding `data_axs.json`
//! and optionally `code_axs.json`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::action::{self, ActionTable};
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{CODE_FILE, CONTAINED_KEY, PARAMS_FILE};
use crate::value::{Map, Value};

/// What `save` does when the target directory already holds another entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Overwrite the existing data file.
    #[default]
    Force,
    /// Save next to it under a timestamped name.
    Timestamp,
    /// Fail with a persistence conflict.
    Raise,
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "force" => Ok(Self::Force),
            "timestamp" => Ok(Self::Timestamp),
            "raise" => Ok(Self::Raise),
            other => Err(format!("unknown collision policy `{other}`")),
        }
    }
}

/// Absolute, lexically normalized form of `path`.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| Error::io(path, err))?
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.as_os_str().is_empty() {
        fs::create_dir_all(path).map_err(|err| Error::io(path, err))?;
    }
    Ok(())
}

fn read_json(file: &Path) -> Result<Option<JsonValue>> {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io(file, err)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| Error::Json {
            path: file.to_path_buf(),
            source,
        })
}

/// Own parameters stored in `dir`, or `None` when there is no data file.
pub fn load_params(dir: &Path) -> Result<Option<Map>> {
    let file = dir.join(PARAMS_FILE);
    match read_json(&file)? {
        None => Ok(None),
        Some(json @ JsonValue::Object(_)) => match Value::from_json(json) {
            Value::Map(map) => Ok(Some(map)),
            _ => Ok(Some(Map::new())),
        },
        Some(other) => Err(Error::Json {
            source: serde::de::Error::custom(format!(
                "expected an object of parameters, found {other}"
            )),
            path: file,
        }),
    }
}

/// Pretty-printed JSON followed by a newline.
pub fn write_params(dir: &Path, json: &JsonValue) -> Result<()> {
    ensure_dir(dir)?;
    let file = dir.join(PARAMS_FILE);
    let mut text = serde_json::to_string_pretty(json).map_err(|source| Error::Json {
        path: file.clone(),
        source,
    })?;
    text.push('\n');
    fs::write(&file, text).map_err(|err| Error::io(&file, err))
}

pub fn load_code_json(dir: &Path) -> Result<Option<JsonValue>> {
    read_json(&dir.join(CODE_FILE))
}

/// Remove an entry directory; returns whether anything was deleted.
pub fn remove_dir(dir: &Path) -> Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io(dir, err)),
    }
}

/// `path` with a `_YYYY.MM.DD_HHhMMmSSs` suffix on its last component.
pub fn timestamped(path: &Path) -> PathBuf {
    let stamp = Local::now().format("_%Y.%m.%d_%Hh%Mm%Ss");
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(&stamp.to_string());
    path.with_file_name(name)
}

impl Kernel {
    /// Read the entry's data file on first access.
    pub(crate) fn ensure_loaded(&mut self, id: EntryId) -> Result<()> {
        if self.record(id).params.is_some() {
            return Ok(());
        }
        let loaded = match self.record(id).path.clone() {
            Some(path) => {
                let loaded = load_params(&path)?;
                if loaded.is_none() {
                    warn!(path = %path.display(), "no data file, starting empty");
                }
                loaded
            }
            None => None,
        };
        let record = self.record_mut(id);
        record.stored = loaded.is_some();
        record.params = Some(loaded.unwrap_or_default());
        Ok(())
    }

    /// Action table of the entry itself, loading `code_axs.json` once.
    pub fn own_actions(&mut self, id: EntryId) -> Result<Rc<ActionTable>> {
        if let Some(table) = self.record(id).actions.get() {
            return Ok(Rc::clone(table));
        }
        let table = match self.record(id).path.clone() {
            Some(path) => match load_code_json(&path)? {
                Some(json) => {
                    debug!(path = %path.display(), "loading code module");
                    action::parse_code(json, self.modules(), &path.join(CODE_FILE))?
                }
                None => ActionTable::new(),
            },
            None => ActionTable::new(),
        };
        let table = Rc::new(table);
        let _ = self.record_mut(id).actions.set(Rc::clone(&table));
        Ok(table)
    }

    /// JSON form of a value, with entry handles pickled as
    /// `["^", "byname", <name>]`.
    pub fn pickle(&self, value: &Value) -> JsonValue {
        value.to_json_with(&mut |id| {
            JsonValue::Array(vec![
                JsonValue::from("^"),
                JsonValue::from("byname"),
                JsonValue::from(self.name_of(id)),
            ])
        })
    }

    /// Persist own parameters, optionally to a new location.
    pub fn save(
        &mut self,
        id: EntryId,
        new_path: Option<&Path>,
        policy: Option<CollisionPolicy>,
    ) -> Result<EntryId> {
        let policy = policy.unwrap_or(self.config().on_collision);
        self.ensure_loaded(id)?;
        let current = self.record(id).path.clone();
        let mut target = match new_path {
            Some(path) => self.resolve_save_path(id, path)?,
            None => current.clone().ok_or_else(|| Error::Unstorable {
                entry: self.name_of(id),
            })?,
        };

        let in_place = current.as_deref() == Some(target.as_path()) && self.record(id).stored;
        if !in_place && target.join(PARAMS_FILE).exists() {
            match policy {
                CollisionPolicy::Force => {
                    warn!(path = %target.display(), "overwriting existing entry");
                }
                CollisionPolicy::Timestamp => target = timestamped(&target),
                CollisionPolicy::Raise => {
                    return Err(Error::PersistenceConflict {
                        path: target,
                        reason: "an entry is already stored there".into(),
                    });
                }
            }
        }
        if current.as_ref() != Some(&target) {
            self.rebind_path(id, target.clone());
        }

        let params = Value::Map(self.record(id).params.clone().unwrap_or_default());
        let json = self.pickle(&params);
        write_params(&target, &json)?;
        self.record_mut(id).stored = true;
        info!(entry = %self.name_of(id), path = %target.display(), "parameters saved");

        self.attach_if_unlisted(id)?;
        Ok(id)
    }

    fn resolve_save_path(&mut self, id: EntryId, path: &Path) -> Result<PathBuf> {
        if path.is_relative() {
            if let Some(container) = self.container_of(id) {
                if let Some(dir) = self.path_of(container) {
                    return normalize_path(&dir.join(path));
                }
            }
        }
        normalize_path(path)
    }

    // Entries created inside a container are listed in it on first save.
    fn attach_if_unlisted(&mut self, id: EntryId) -> Result<()> {
        let Some(container) = self.container_of(id) else {
            return Ok(());
        };
        self.ensure_loaded(container)?;
        let name = self.name_of(id);
        let listed = self
            .record(container)
            .params
            .as_ref()
            .and_then(|params| params.get(CONTAINED_KEY))
            .and_then(Value::as_map)
            .is_some_and(|children| children.contains_key(&name));
        if listed {
            return Ok(());
        }
        self.attach(id, Some(container)).map(|_| ())
    }

    /// Detach from the container and delete the stored directory.
    ///
    /// The in-memory parameters survive, so a later `save` restores the entry.
    pub fn remove(&mut self, id: EntryId) -> Result<EntryId> {
        self.ensure_loaded(id)?;
        if self.container_of(id).is_some() {
            self.detach(id)?;
        }
        if let Some(path) = self.path_of(id).map(Path::to_path_buf) {
            if remove_dir(&path)? {
                warn!(entry = %self.name_of(id), path = %path.display(), "entry removed");
            }
        }
        let record = self.record_mut(id);
        record.stored = false;
        Ok(id)
    }

    /// Drop parameters, parents, actions and the call cache; the next access
    /// reads storage again.
    pub fn reload(&mut self, id: EntryId) -> Result<EntryId> {
        if self.path_of(id).is_none() {
            return Err(Error::Unstorable {
                entry: self.name_of(id),
            });
        }
        self.record_mut(id).invalidate();
        Ok(id)
    }
}
