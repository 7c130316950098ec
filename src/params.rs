//! Parameter resolution: context scopes, own data, lazy parameters and
//! depth-first delegation to parents.

use std::borrow::Cow;
use std::collections::HashSet;

use tracing::trace;

use crate::context::{Context, Scope};
use crate::entry::{EntryId, ParentRef};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{LAZY_PREFIX, PARENTS_KEY, RECORD_PARAM, SELF_PARAM};
use crate::value::{Map, Value};

enum Found {
    /// Stored value, still to be interpreted against the requester.
    Stored { holder: EntryId, value: Value },
    /// Already computed from a lazy parameter.
    Computed(Value),
}

type Visit<'a, T> = dyn FnMut(&mut Kernel, EntryId) -> Result<Option<T>> + 'a;

impl Kernel {
    /// Resolve `name` for `entry`; `Ok(None)` on a miss.
    pub fn lookup(&mut self, entry: EntryId, name: &str, ctx: &Context) -> Result<Option<Value>> {
        match name {
            SELF_PARAM => return Ok(Some(Value::Entry(entry))),
            RECORD_PARAM => {
                return Ok(Some(ctx.get(RECORD_PARAM).cloned().unwrap_or(Value::Unbound)));
            }
            _ => {}
        }

        for scope in ctx.scopes() {
            match scope {
                Scope::Data(map) => {
                    if let Some(value) = map.get(name) {
                        return Ok(Some(value.clone()));
                    }
                }
                Scope::Entry(source) => {
                    let source = *source;
                    if let Some(value) = self.lookup(source, name, &Context::new())? {
                        return Ok(Some(value));
                    }
                }
            }
        }

        let found = self.search_ancestry(entry, &mut |kernel, holder| {
            kernel.find_own(entry, holder, name, ctx)
        })?;
        match found {
            None => Ok(None),
            Some(Found::Computed(value)) => Ok(Some(value)),
            Some(Found::Stored { holder, value }) => {
                self.blocked.push((holder, name.to_string(), entry));
                let result = self.evaluate(entry, &value, ctx).map(Cow::into_owned);
                self.blocked.pop();
                result.map(Some)
            }
        }
    }

    /// Like [`Kernel::lookup`], but a miss is a `NotFound` error.
    pub fn get(&mut self, entry: EntryId, name: &str, ctx: &Context) -> Result<Value> {
        self.lookup(entry, name, ctx)?.ok_or_else(|| {
            Error::not_found("parameter", format!("{}.{name}", self.name_of(entry)))
        })
    }

    pub fn get_or(
        &mut self,
        entry: EntryId,
        name: &str,
        default: Value,
        ctx: &Context,
    ) -> Result<Value> {
        Ok(self.lookup(entry, name, ctx)?.unwrap_or(default))
    }

    /// Uninterpreted own value of `name`, without delegation.
    pub fn get_raw(&mut self, entry: EntryId, name: &str) -> Result<Option<Value>> {
        Ok(self.own_data(entry)?.get(name).cloned())
    }

    pub fn own_data(&mut self, entry: EntryId) -> Result<&Map> {
        self.ensure_loaded(entry)?;
        Ok(self.record_mut(entry).params.get_or_insert_with(Map::new))
    }

    pub(crate) fn own_data_mut(&mut self, entry: EntryId) -> Result<&mut Map> {
        self.ensure_loaded(entry)?;
        Ok(self.record_mut(entry).params.get_or_insert_with(Map::new))
    }

    /// Set an own parameter. Assigning the parent list resets resolved parents.
    pub fn set(&mut self, entry: EntryId, name: &str, value: impl Into<Value>) -> Result<()> {
        self.own_data_mut(entry)?.insert(name.to_string(), value.into());
        if name == PARENTS_KEY {
            self.record_mut(entry).parents = None;
        }
        Ok(())
    }

    /// Set a value at a dotted path inside own data, creating maps on the way.
    pub fn plant(&mut self, entry: EntryId, key_path: &str, value: impl Into<Value>) -> Result<()> {
        let segments: Vec<&str> = key_path.split('.').collect();
        let Some((last, dirs)) = segments.split_last() else {
            return Ok(());
        };
        if dirs.is_empty() {
            return self.set(entry, last, value);
        }
        let mut node = self.own_data_mut(entry)?;
        for segment in dirs {
            let slot = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Map(Map::new()));
            if !matches!(slot, Value::Map(_)) {
                *slot = Value::Map(Map::new());
            }
            node = match slot {
                Value::Map(map) => map,
                _ => unreachable!("slot was just replaced by a map"),
            };
        }
        node.insert(last.to_string(), value.into());
        if dirs[0] == PARENTS_KEY {
            self.record_mut(entry).parents = None;
        }
        Ok(())
    }

    /// Remove and return the value at a dotted path of own data.
    pub fn pluck(&mut self, entry: EntryId, key_path: &str) -> Result<Option<Value>> {
        let segments: Vec<&str> = key_path.split('.').collect();
        let Some((last, dirs)) = segments.split_last() else {
            return Ok(None);
        };
        let mut node = self.own_data_mut(entry)?;
        for segment in dirs {
            node = match node.get_mut(*segment) {
                Some(Value::Map(map)) => map,
                _ => return Ok(None),
            };
        }
        let removed = node.shift_remove(*last);
        if segments[0] == PARENTS_KEY {
            self.record_mut(entry).parents = None;
        }
        Ok(removed)
    }

    /// Follow a dotted path: the first segment is a parameter lookup, later
    /// segments index into maps, lists or further entries.
    pub fn dig(&mut self, entry: EntryId, key_path: &str, ctx: &Context) -> Result<Option<Value>> {
        let segments: Vec<&str> = key_path.split('.').collect();
        self.dig_path(entry, &segments, ctx)
    }

    pub fn dig_path(
        &mut self,
        entry: EntryId,
        segments: &[&str],
        ctx: &Context,
    ) -> Result<Option<Value>> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Some(Value::Entry(entry)));
        };
        let Some(mut current) = self.lookup(entry, first, ctx)? else {
            return Ok(None);
        };
        for segment in rest {
            let next = match current {
                Value::Entry(id) => self.lookup(id, segment, &Context::new())?,
                Value::Map(mut map) => map.shift_remove(*segment),
                Value::List(mut items) => match segment.parse::<usize>() {
                    Ok(idx) if idx < items.len() => Some(items.swap_remove(idx)),
                    _ => None,
                },
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Replace every `#{name}#` occurrence in one left-to-right pass.
    /// Inserted text is not scanned again.
    pub fn substitute(&mut self, entry: EntryId, template: &str, ctx: &Context) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("#{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}#") else {
                break;
            };
            let key = &after[..end];
            out.push_str(&rest[..start]);
            let value = self.dig(entry, key, ctx)?.ok_or_else(|| {
                Error::not_found("parameter", format!("{}.{key}", self.name_of(entry)))
            })?;
            out.push_str(&self.render(&value));
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Text form used when splicing values into templates.
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Entry(id) => match self.path_of(*id) {
                Some(path) => path.display().to_string(),
                None => self.name_of(*id),
            },
            other => other.to_string(),
        }
    }

    /// Resolved parents in declared order.
    pub fn parents(&mut self, entry: EntryId) -> Result<Vec<EntryId>> {
        if self.record(entry).parents.is_none() {
            let declared = match self.own_data(entry)?.get(PARENTS_KEY) {
                None => Vec::new(),
                Some(Value::List(items)) => items.clone(),
                Some(single) => vec![single.clone()],
            };
            let refs = declared
                .into_iter()
                .map(|item| match item {
                    Value::Entry(id) => ParentRef::Resolved(id),
                    other => ParentRef::Pending(other),
                })
                .collect();
            self.record_mut(entry).parents = Some(refs);
        }

        let count = self.record(entry).parents.as_ref().map_or(0, Vec::len);
        let mut resolved = Vec::with_capacity(count);
        for idx in 0..count {
            let slot = self.parent_slot(entry, idx);
            let parent = match std::mem::replace(slot, ParentRef::Resolving) {
                ParentRef::Resolved(id) => id,
                ParentRef::Resolving => {
                    return Err(Error::CycleDetected {
                        chain: vec![self.name_of(entry), PARENTS_KEY.to_string()],
                    });
                }
                ParentRef::Pending(expr) => match self.resolve_parent(entry, &expr) {
                    Ok(id) => id,
                    Err(err) => {
                        *self.parent_slot(entry, idx) = ParentRef::Pending(expr);
                        return Err(err);
                    }
                },
            };
            *self.parent_slot(entry, idx) = ParentRef::Resolved(parent);
            resolved.push(parent);
        }
        Ok(resolved)
    }

    fn parent_slot(&mut self, entry: EntryId, idx: usize) -> &mut ParentRef {
        // Only called after `parents` has populated the list.
        let parents = self.record_mut(entry).parents.get_or_insert_with(Vec::new);
        if idx >= parents.len() {
            parents.resize(idx + 1, ParentRef::Resolving);
        }
        &mut parents[idx]
    }

    fn resolve_parent(&mut self, entry: EntryId, expr: &Value) -> Result<EntryId> {
        let value = match expr {
            Value::Text(name) => {
                return self.byname(name)?.ok_or_else(|| Error::not_found("parent", name.clone()));
            }
            other => self.evaluate(entry, other, &Context::new())?.into_owned(),
        };
        match value {
            Value::Entry(id) => {
                trace!(entry = %self.name_of(entry), parent = %self.name_of(id), "parent resolved");
                Ok(id)
            }
            other => Err(Error::InvalidParent {
                entry: self.name_of(entry),
                found: other.kind().to_string(),
            }),
        }
    }

    /// Depth-first walk over `start` and its ancestors in declared parent
    /// order, stopping at the first `Some`. Shared ancestors are visited
    /// once; an ancestor reached again along its own path is a cycle.
    pub(crate) fn search_ancestry<T>(
        &mut self,
        start: EntryId,
        visit: &mut Visit<'_, T>,
    ) -> Result<Option<T>> {
        let mut visited = HashSet::new();
        let mut chain = Vec::new();
        self.search_from(start, visit, &mut visited, &mut chain)
    }

    fn search_from<T>(
        &mut self,
        node: EntryId,
        visit: &mut Visit<'_, T>,
        visited: &mut HashSet<EntryId>,
        chain: &mut Vec<EntryId>,
    ) -> Result<Option<T>> {
        if chain.contains(&node) {
            let mut cycle = chain.clone();
            cycle.push(node);
            return Err(Error::CycleDetected {
                chain: self.names_of(&cycle),
            });
        }
        if !visited.insert(node) {
            return Ok(None);
        }
        if let Some(found) = visit(self, node)? {
            return Ok(Some(found));
        }
        chain.push(node);
        let outcome = self.search_parents(node, visit, visited, chain);
        chain.pop();
        outcome
    }

    fn search_parents<T>(
        &mut self,
        node: EntryId,
        visit: &mut Visit<'_, T>,
        visited: &mut HashSet<EntryId>,
        chain: &mut Vec<EntryId>,
    ) -> Result<Option<T>> {
        for parent in self.parents(node)? {
            if let Some(found) = self.search_from(parent, visit, visited, chain)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn find_own(
        &mut self,
        requester: EntryId,
        holder: EntryId,
        name: &str,
        ctx: &Context,
    ) -> Result<Option<Found>> {
        if self.is_blocked(holder, name, requester) {
            return Ok(None);
        }
        let own = self.own_data(holder)?;
        if let Some(value) = own.get(name) {
            return Ok(Some(Found::Stored {
                holder,
                value: value.clone(),
            }));
        }
        let Some(template) = own.get(&format!("{LAZY_PREFIX}{name}")).cloned() else {
            return Ok(None);
        };

        self.blocked.push((holder, name.to_string(), requester));
        let result = match &template {
            Value::Text(text) => self.substitute(requester, text, ctx).map(Value::Text),
            other => self.evaluate(requester, other, ctx).map(Cow::into_owned),
        };
        self.blocked.pop();
        result.map(|value| Some(Found::Computed(value)))
    }

    fn is_blocked(&self, holder: EntryId, name: &str, requester: EntryId) -> bool {
        self.blocked
            .iter()
            .any(|(h, n, r)| *h == holder && *r == requester && n == name)
    }
}
