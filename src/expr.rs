//! Interpretation of deferred calls and escapes embedded in data.

use std::borrow::Cow;

use tracing::error;

use crate::context::Context;
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{ESCAPE, KERNEL_CALL, SELF_CALL};
use crate::value::{Map, Value};

/// Parsed `[action, args?, overrides?]` tail of a deferred call.
pub(crate) struct CallForm {
    pub action: String,
    pub args: Vec<Value>,
    pub overrides: Map,
}

impl CallForm {
    pub fn parse(whole: &Value, rest: &[Value]) -> Result<Self> {
        let action = match rest.first() {
            Some(Value::Text(action)) => action.clone(),
            _ => return Err(Error::malformed_expression(whole, "call needs an action name")),
        };
        let args = match rest.get(1) {
            None => Vec::new(),
            Some(Value::List(args)) => args.clone(),
            Some(single) => vec![single.clone()],
        };
        let overrides = match rest.get(2) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Map(map)) => map.clone(),
            Some(_) => return Err(Error::malformed_expression(whole, "overrides must be a map")),
        };
        if rest.len() > 3 {
            return Err(Error::malformed_expression(whole, "too many call elements"));
        }
        Ok(Self {
            action,
            args,
            overrides,
        })
    }
}

impl Kernel {
    /// Rewrite every deferred call and escape inside `value`.
    ///
    /// When nothing needed rewriting the input is handed back borrowed.
    pub fn evaluate<'v>(
        &mut self,
        entry: EntryId,
        value: &'v Value,
        ctx: &Context,
    ) -> Result<Cow<'v, Value>> {
        Ok(match self.rewrite(entry, value, ctx)? {
            Some(rewritten) => Cow::Owned(rewritten),
            None => Cow::Borrowed(value),
        })
    }

    fn rewrite(&mut self, entry: EntryId, value: &Value, ctx: &Context) -> Result<Option<Value>> {
        match value {
            Value::List(items) => match items.first() {
                Some(Value::Text(head)) if head == SELF_CALL => {
                    self.deferred_call(entry, value, &items[1..], ctx).map(Some)
                }
                Some(Value::Text(head)) if head == KERNEL_CALL => {
                    let kernel = self.kernel_entry();
                    self.deferred_call(kernel, value, &items[1..], &Context::new())
                        .map(Some)
                }
                Some(Value::Text(head)) if head == ESCAPE => Ok(Some(Value::List(items[1..].to_vec()))),
                _ => {
                    let mut rebuilt: Option<Vec<Value>> = None;
                    for (idx, item) in items.iter().enumerate() {
                        match self.rewrite(entry, item, ctx)? {
                            Some(new) => rebuilt.get_or_insert_with(|| items[..idx].to_vec()).push(new),
                            None => {
                                if let Some(out) = rebuilt.as_mut() {
                                    out.push(item.clone());
                                }
                            }
                        }
                    }
                    Ok(rebuilt.map(Value::List))
                }
            },
            Value::Map(map) => {
                // The escape key wins over, and discards, its siblings.
                if let Some(inner) = map.get(ESCAPE) {
                    return Ok(Some(inner.clone()));
                }
                let mut rebuilt: Option<Map> = None;
                for (idx, (key, item)) in map.iter().enumerate() {
                    match self.rewrite(entry, item, ctx)? {
                        Some(new) => {
                            rebuilt
                                .get_or_insert_with(|| {
                                    map.iter()
                                        .take(idx)
                                        .map(|(k, v)| (k.clone(), v.clone()))
                                        .collect()
                                })
                                .insert(key.clone(), new);
                        }
                        None => {
                            if let Some(out) = rebuilt.as_mut() {
                                out.insert(key.clone(), item.clone());
                            }
                        }
                    }
                }
                Ok(rebuilt.map(Value::Map))
            }
            _ => Ok(None),
        }
    }

    fn deferred_call(
        &mut self,
        target: EntryId,
        whole: &Value,
        rest: &[Value],
        ctx: &Context,
    ) -> Result<Value> {
        let form = CallForm::parse(whole, rest)?;
        self.call(target, &form.action, form.args, form.overrides, ctx)
            .inspect_err(|err| {
                error!(
                    entry = %self.name_of(target),
                    expression = %whole.canonical(),
                    "deferred call failed: {err}"
                );
            })
    }

    /// Evaluate every value of an override map against `entry`.
    pub(crate) fn evaluate_map(&mut self, entry: EntryId, map: Map, ctx: &Context) -> Result<Map> {
        let mut out = Map::with_capacity(map.len());
        for (key, value) in map {
            let value = self.rewrite(entry, &value, ctx)?.unwrap_or(value);
            out.insert(key, value);
        }
        Ok(out)
    }
}
