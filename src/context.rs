//! Explicit, immutable stack of transient parameter sources.
//!
//! A context is threaded through every lookup and call. Extending it yields a
//! new context that shares the outer scopes, so leaving a call needs no
//! restoration step.

use std::fmt::Write as _;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::entry::EntryId;
use crate::value::{Map, Value};

#[derive(Clone, Debug)]
pub enum Scope {
    Data(Rc<Map>),
    /// An entry consulted as a whole parameter source.
    Entry(EntryId),
}

#[derive(Clone, Debug, Default)]
pub struct Context {
    // outermost first
    scopes: SmallVec<[Scope; 4]>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// New context with `scope` as its innermost source.
    pub fn with_scope(&self, scope: Map) -> Context {
        self.with_shared(Rc::new(scope))
    }

    pub fn with_shared(&self, scope: Rc<Map>) -> Context {
        let mut scopes = self.scopes.clone();
        scopes.push(Scope::Data(scope));
        Context { scopes }
    }

    pub fn with_entry(&self, entry: EntryId) -> Context {
        let mut scopes = self.scopes.clone();
        scopes.push(Scope::Entry(entry));
        Context { scopes }
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Scopes innermost first.
    pub fn scopes(&self) -> impl Iterator<Item = &Scope> {
        self.scopes.iter().rev()
    }

    /// Innermost data-scope value for `name`, ignoring entry scopes.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes().find_map(|scope| match scope {
            Scope::Data(map) => map.get(name),
            Scope::Entry(_) => None,
        })
    }

    pub(crate) fn write_canonical(&self, out: &mut String) {
        for scope in &self.scopes {
            match scope {
                Scope::Data(map) => Value::Map(map.as_ref().clone()).write_canonical(out),
                Scope::Entry(id) => {
                    let _ = write!(out, "<entry{id}>");
                }
            }
            out.push('|');
        }
    }
}
