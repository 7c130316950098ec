//! The call engine: memoization, override scopes, binding, call records.

use std::borrow::Cow;

use tracing::{debug, info_span};

use crate::action::{Action, ActionBody, Invocation};
use crate::context::Context;
use crate::digest;
use crate::entry::{CachedCall, EntryBuilder, EntryId};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{KERNEL_CALL, RECORD_PARAM, REPLAY_KEY, RESULT_KEY, is_reserved_param};
use crate::value::{Map, Value};

/// A call on an entry: action path, positional arguments and overrides.
#[derive(Clone, Debug)]
pub struct CallRequest {
    pub action: String,
    pub args: Vec<Value>,
    pub overrides: Map,
    /// Deterministic calls are served from the per-entry cache.
    pub deterministic: bool,
}

impl CallRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            args: Vec::new(),
            overrides: Map::new(),
            deterministic: true,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn overrides(mut self, overrides: Map) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn nondeterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallOutcome {
    pub value: Value,
    /// Call record produced for this call, or for the memoized call a cache
    /// hit returned, when recording is on.
    pub record: Option<EntryId>,
    pub cached: bool,
}

impl Kernel {
    /// Deterministic call of `action` on `entry`.
    pub fn call(
        &mut self,
        entry: EntryId,
        action: &str,
        args: Vec<Value>,
        overrides: Map,
        ctx: &Context,
    ) -> Result<Value> {
        let request = CallRequest::new(action).args(args).overrides(overrides);
        self.call_with(entry, request, ctx).map(|outcome| outcome.value)
    }

    /// Full call. A dotted action path `a.b.act` first digs `a.b` from the
    /// entry; a leading dot digs from a named entry instead.
    pub fn call_with(
        &mut self,
        entry: EntryId,
        mut request: CallRequest,
        ctx: &Context,
    ) -> Result<CallOutcome> {
        self.check_entry(entry)?;
        if let Some((head, local)) = request.action.rsplit_once('.') {
            let target = self.qualified_target(entry, head, ctx)?;
            request.action = local.to_string();
            return self.local_call(target, request, ctx);
        }
        self.local_call(entry, request, ctx)
    }

    fn qualified_target(&mut self, entry: EntryId, head: &str, ctx: &Context) -> Result<EntryId> {
        let found = match head.strip_prefix('.') {
            Some(rest) => {
                let (name, tail) = match rest.split_once('.') {
                    Some((name, tail)) => (name, Some(tail)),
                    None => (rest, None),
                };
                let named = self
                    .byname(name)?
                    .ok_or_else(|| Error::not_found("entry", name))?;
                match tail {
                    Some(tail) => self.dig(named, tail, &Context::new())?,
                    None => Some(Value::Entry(named)),
                }
            }
            None => self.dig(entry, head, ctx)?,
        };
        match found {
            Some(Value::Entry(id)) => Ok(id),
            _ => Err(Error::not_found("entry", head)),
        }
    }

    fn local_call(
        &mut self,
        entry: EntryId,
        request: CallRequest,
        ctx: &Context,
    ) -> Result<CallOutcome> {
        let CallRequest {
            action: name,
            args,
            overrides,
            deterministic,
        } = request;
        let key = digest::call_key(&name, &args, ctx, &overrides);
        let span = info_span!("call", entry = %self.name_of(entry), action = %name);
        let _guard = span.enter();

        if deterministic {
            if let Some(cached) = self.record(entry).call_cache.get(&key) {
                debug!("cache hit");
                return Ok(CallOutcome {
                    value: cached.value.clone(),
                    record: cached.record,
                    cached: true,
                });
            }
        }
        debug!("cache miss");

        let overrides = self.evaluate_map(entry, overrides, ctx)?;
        let override_keys: Vec<String> = overrides.keys().cloned().collect();
        let call_ctx = ctx.with_scope(overrides);

        let reached = self.reach_action(entry, &name)?;
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in &args {
            evaluated.push(self.evaluate(entry, arg, &call_ctx)?.into_owned());
        }

        let record = if self.recording {
            Some(self.open_call_record(entry, &name))
        } else {
            None
        };
        let record_value = record.map_or(Value::Unbound, Value::Entry);
        let bound = self.bind(entry, &reached.action, evaluated, &call_ctx, &record_value)?;
        if let Some(record) = record {
            self.fill_call_record(record, entry, &name, &bound, &override_keys, &call_ctx)?;
        }

        let invocation = Invocation::new(entry, &name, bound, call_ctx, record);
        let value = self.invoke(&reached.action, &invocation)?;

        if let Some(record) = record {
            if value != Value::Entry(record) {
                self.set(record, RESULT_KEY, value.clone())?;
            }
        }
        self.record_mut(entry).call_cache.insert(
            key,
            CachedCall {
                value: value.clone(),
                record,
            },
        );
        Ok(CallOutcome {
            value,
            record,
            cached: false,
        })
    }

    pub(crate) fn invoke(&mut self, action: &Action, invocation: &Invocation) -> Result<Value> {
        match &action.body {
            ActionBody::Native(body) => {
                let body = body.clone();
                body(self, invocation)
            }
            ActionBody::Script(body) => {
                let mut scope: Map = invocation
                    .bound()
                    .filter(|(name, _)| !is_reserved_param(name))
                    .map(|(name, value)| (name.to_string(), value.clone()))
                    .collect();
                if let Some(record) = invocation.record {
                    scope.insert(RECORD_PARAM.to_string(), Value::Entry(record));
                }
                let ctx = invocation.ctx.with_scope(scope);
                self.evaluate(invocation.entry, body, &ctx).map(Cow::into_owned)
            }
        }
    }

    fn open_call_record(&mut self, entry: EntryId, action: &str) -> EntryId {
        self.record_counter += 1;
        let name = format!(
            "generated_by_{}_on_{}_{}",
            self.name_of(entry),
            action,
            self.record_counter
        );
        let mut builder = EntryBuilder::named(name.as_str());
        if let Some(container) = self.record_container {
            builder = builder.container(container);
            if let Some(dir) = self.path_of(container) {
                builder = builder.path(dir.join(&name));
            }
        }
        self.create(builder)
    }

    // Bound arguments, unconsumed overrides and a replay expression. The
    // recorded arguments inside the replay are escaped so they are passed on
    // as data.
    fn fill_call_record(
        &mut self,
        record: EntryId,
        entry: EntryId,
        action: &str,
        bound: &[(String, Value)],
        override_keys: &[String],
        ctx: &Context,
    ) -> Result<()> {
        let mut recorded = Map::new();
        for (name, value) in bound {
            if !is_reserved_param(name) {
                recorded.insert(name.clone(), value.clone());
            }
        }
        for key in override_keys {
            if !recorded.contains_key(key) {
                if let Some(value) = ctx.get(key) {
                    recorded.insert(key.clone(), value.clone());
                }
            }
        }
        for (name, value) in &recorded {
            self.set(record, name, value.clone())?;
        }

        let replay = Value::List(vec![
            Value::from(KERNEL_CALL),
            Value::from("execute"),
            Value::List(vec![Value::List(vec![
                Value::List(vec![
                    Value::from("byname"),
                    Value::List(vec![Value::from(self.name_of(entry))]),
                ]),
                Value::List(vec![
                    Value::from(action),
                    Value::List(Vec::new()),
                    Value::escaped(Value::Map(recorded)),
                ]),
            ])]),
        ]);
        self.set(record, REPLAY_KEY, replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Signature;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_entry(kernel: &mut Kernel, counter: Rc<Cell<u32>>) -> EntryId {
        let action = Action::native("tick", Signature::new(["n"]), move |_, inv| {
            counter.set(counter.get() + 1);
            Ok(inv.value("n")?.clone())
        });
        kernel.create(EntryBuilder::named("counter").action(action))
    }

    #[test]
    fn deterministic_calls_are_memoized() {
        let mut kernel = Kernel::default();
        let counter = Rc::new(Cell::new(0));
        let entry = counting_entry(&mut kernel, counter.clone());
        let ctx = Context::new();
        let first = kernel.call(entry, "tick", vec![Value::Int(1)], Map::new(), &ctx).unwrap();
        let second = kernel.call(entry, "tick", vec![Value::Int(1)], Map::new(), &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.get(), 1);
        kernel.call(entry, "tick", vec![Value::Int(2)], Map::new(), &ctx).unwrap();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn nondeterministic_calls_always_run() {
        let mut kernel = Kernel::default();
        let counter = Rc::new(Cell::new(0));
        let entry = counting_entry(&mut kernel, counter.clone());
        let ctx = Context::new();
        for _ in 0..2 {
            let request = CallRequest::new("tick").arg(1).nondeterministic();
            kernel.call_with(entry, request, &ctx).unwrap();
        }
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn overrides_reach_fallback_binding() {
        let mut kernel = Kernel::default();
        let counter = Rc::new(Cell::new(0));
        let entry = counting_entry(&mut kernel, counter);
        let request = CallRequest::new("tick").set("n", 7);
        let outcome = kernel.call_with(entry, request, &Context::new()).unwrap();
        assert_eq!(outcome.value, Value::Int(7));
        assert!(!outcome.cached);
    }

    #[test]
    fn script_actions_see_bound_arguments() {
        let mut kernel = Kernel::default();
        let action = Action::script(
            "meme",
            Signature::new(["does"]).optional("person", "Bill"),
            Value::from(serde_json::json!(["^^", "substitute", "#{person}# #{does}#"])),
        );
        let entry = kernel.create(EntryBuilder::new().action(action));
        let out = kernel
            .call(entry, "meme", vec![Value::from("codes")], Map::new(), &Context::new())
            .unwrap();
        assert_eq!(out, Value::from("Bill codes"));
    }

    #[test]
    fn qualified_path_digs_target_entry() {
        let mut kernel = Kernel::default();
        let inner = kernel.create(EntryBuilder::named("inner").param("x", 5));
        let outer = kernel.create(EntryBuilder::named("outer").param("tool", inner));
        let out = kernel
            .call(outer, "tool.get", vec![Value::from("x")], Map::new(), &Context::new())
            .unwrap();
        assert_eq!(out, Value::Int(5));
    }

    #[test]
    fn cache_hit_returns_the_original_record() {
        let mut kernel = Kernel::default();
        kernel.set_recording(true, None);
        let counter = Rc::new(Cell::new(0));
        let entry = counting_entry(&mut kernel, counter.clone());
        let ctx = Context::new();
        let first = kernel.call_with(entry, CallRequest::new("tick").arg(4), &ctx).unwrap();
        let second = kernel.call_with(entry, CallRequest::new("tick").arg(4), &ctx).unwrap();
        assert!(second.cached);
        assert_eq!(counter.get(), 1);
        assert!(first.record.is_some());
        assert_eq!(second.record, first.record);
    }

    #[test]
    fn recording_captures_arguments_and_result() {
        let mut kernel = Kernel::default();
        kernel.set_recording(true, None);
        let counter = Rc::new(Cell::new(0));
        let entry = counting_entry(&mut kernel, counter);
        let request = CallRequest::new("tick").arg(3).set("unused", "u");
        let outcome = kernel.call_with(entry, request, &Context::new()).unwrap();
        let record = outcome.record.unwrap();
        assert!(kernel.name_of(record).starts_with("generated_by_counter_on_tick_"));
        let data = kernel.own_data(record).unwrap().clone();
        assert_eq!(data["n"], Value::Int(3));
        assert_eq!(data["unused"], Value::from("u"));
        assert_eq!(data[RESULT_KEY], Value::Int(3));
        assert!(data.contains_key(REPLAY_KEY));
    }
}
