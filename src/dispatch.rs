//! Action lookup along the ancestry, and argument binding.

use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use crate::action::Action;
use crate::context::Context;
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{RECORD_PARAM, SELF_PARAM};
use crate::value::Value;

/// Where a reached action was defined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Own,
    Inherited(EntryId),
    Builtin,
}

#[derive(Clone, Debug)]
pub struct Reached {
    pub action: Rc<Action>,
    pub origin: Origin,
}

impl Kernel {
    /// Find `name` in the entry's own actions, then its ancestors depth-first,
    /// then the built-in set.
    pub fn reach_action(&mut self, entry: EntryId, name: &str) -> Result<Reached> {
        let mut searched: SmallVec<[EntryId; 4]> = SmallVec::new();
        let found = self.search_ancestry(entry, &mut |kernel, holder| {
            searched.push(holder);
            Ok(kernel.own_actions(holder)?.get(name).map(|action| (action, holder)))
        })?;

        if let Some((action, holder)) = found {
            let origin = if holder == entry {
                Origin::Own
            } else {
                Origin::Inherited(holder)
            };
            trace!(entry = %self.name_of(entry), action = name, ?origin, "action reached");
            return Ok(Reached { action, origin });
        }
        if let Some(action) = self.builtins.get(name) {
            return Ok(Reached {
                action,
                origin: Origin::Builtin,
            });
        }
        Err(Error::ActionNotFound {
            action: name.to_string(),
            searched: self.names_of(&searched),
        })
    }

    pub fn can(&mut self, entry: EntryId, name: &str) -> Result<bool> {
        match self.reach_action(entry, name) {
            Ok(_) => Ok(true),
            Err(Error::ActionNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Every action callable on `entry`: own and inherited first, then
    /// built-ins, without duplicates.
    pub fn possible_actions(&mut self, entry: EntryId) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        self.search_ancestry::<()>(entry, &mut |kernel, holder| {
            for name in kernel.own_actions(holder)?.names() {
                if !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
            }
            Ok(None)
        })?;
        for name in self.builtins.names() {
            if !names.iter().any(|known| known == name) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Bind arguments to the action's declared parameters.
    ///
    /// Explicit positionals fill required then optional parameters in order.
    /// Remaining required parameters come from parameter lookup on `entry`;
    /// every required name still missing is reported at once. Remaining
    /// optional parameters use lookup, then their declared default. A lookup
    /// that fails with not-found (a lazy template naming an absent key) counts
    /// as absent.
    pub(crate) fn bind(
        &mut self,
        entry: EntryId,
        action: &Action,
        explicit: Vec<Value>,
        ctx: &Context,
        record: &Value,
    ) -> Result<Vec<(String, Value)>> {
        let signature = &action.signature;
        if let Some(param) = &signature.variadic {
            return Err(Error::VariadicUnsupported {
                action: action.name.clone(),
                param: param.clone(),
            });
        }
        if explicit.len() > signature.arity() {
            return Err(Error::TooManyArguments {
                action: action.name.clone(),
                accepted: signature.arity(),
                given: explicit.len(),
            });
        }

        let mut explicit = explicit.into_iter();
        let mut bound = Vec::with_capacity(signature.arity());
        let mut missing = Vec::new();
        for name in &signature.required {
            let value = match explicit.next() {
                Some(value) => Some(value),
                None => self.fallback(entry, name, ctx, record)?,
            };
            match value {
                Some(value) => bound.push((name.clone(), value)),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(Error::MissingArgument {
                action: action.name.clone(),
                missing,
            });
        }
        for (name, default) in &signature.optional {
            let value = match explicit.next() {
                Some(value) => value,
                None => self
                    .fallback(entry, name, ctx, record)?
                    .unwrap_or_else(|| default.clone()),
            };
            bound.push((name.clone(), value));
        }
        Ok(bound)
    }

    fn fallback(
        &mut self,
        entry: EntryId,
        name: &str,
        ctx: &Context,
        record: &Value,
    ) -> Result<Option<Value>> {
        match name {
            SELF_PARAM => Ok(Some(Value::Entry(entry))),
            RECORD_PARAM => Ok(Some(record.clone())),
            _ => match self.lookup(entry, name, ctx) {
                Err(err) if err.is_not_found() => {
                    trace!(param = name, error = %err, "failed lookup binds as absent");
                    Ok(None)
                }
                other => other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionTable, Signature};
    use crate::entry::EntryBuilder;

    fn echo(name: &str) -> Action {
        Action::native(name, Signature::default(), |_, inv| Ok(Value::from(inv.action.as_str())))
    }

    #[test]
    fn own_action_wins_over_parent_and_builtin() {
        let mut kernel = Kernel::default();
        let parent = kernel.create(EntryBuilder::named("p").action(echo("get")));
        let child = kernel.create(EntryBuilder::named("c").action(echo("get")).parent(parent));
        assert_eq!(kernel.reach_action(child, "get").unwrap().origin, Origin::Own);
    }

    #[test]
    fn inherited_action_reports_its_holder() {
        let mut kernel = Kernel::default();
        let parent = kernel.create(EntryBuilder::named("p").action(echo("greet")));
        let child = kernel.create(EntryBuilder::named("c").parent(parent));
        let reached = kernel.reach_action(child, "greet").unwrap();
        assert_eq!(reached.origin, Origin::Inherited(parent));
    }

    #[test]
    fn builtins_are_the_last_resort() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        assert_eq!(kernel.reach_action(entry, "get").unwrap().origin, Origin::Builtin);
    }

    #[test]
    fn missing_action_lists_search_path() {
        let mut kernel = Kernel::default();
        let parent = kernel.create(EntryBuilder::named("p"));
        let child = kernel.create(EntryBuilder::named("c").parent(parent));
        match kernel.reach_action(child, "nope").unwrap_err() {
            Error::ActionNotFound { searched, .. } => assert_eq!(searched, ["c", "p"]),
            other => panic!("unexpected error {other}"),
        }
        assert!(!kernel.can(child, "nope").unwrap());
    }

    fn four_params() -> Action {
        Action::native(
            "four",
            Signature::new(["a", "b"]).optional("c", 3).optional("d", 4),
            |_, _| Ok(Value::Null),
        )
    }

    #[test]
    fn binding_prefers_explicit_then_lookup_then_default() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new().param("b", 2).param("c", 10));
        let ctx = Context::new().with_scope(
            [("d".to_string(), Value::Int(99))].into_iter().collect(),
        );
        let bound = kernel
            .bind(entry, &four_params(), vec![Value::Int(1)], &ctx, &Value::Unbound)
            .unwrap();
        let values: Vec<Value> = bound.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, [Value::Int(1), Value::Int(2), Value::Int(10), Value::Int(99)]);
    }

    #[test]
    fn binding_falls_back_to_declared_default() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let action = Action::native(
            "action",
            Signature::new(["req1", "req2"])
                .optional("opt1", 10)
                .optional("opt2", 20),
            |_, _| Ok(Value::Null),
        );
        let ctx = Context::new().with_scope(
            [
                ("req2".to_string(), Value::Int(2)),
                ("opt2".to_string(), Value::Int(99)),
            ]
            .into_iter()
            .collect(),
        );
        let bound = kernel
            .bind(entry, &action, vec![Value::Int(1)], &ctx, &Value::Unbound)
            .unwrap();
        let names: Vec<&str> = bound.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["req1", "req2", "opt1", "opt2"]);
        let values: Vec<Value> = bound.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, [Value::Int(1), Value::Int(2), Value::Int(10), Value::Int(99)]);
    }

    #[test]
    fn failing_lazy_optional_uses_default() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new().param("~c", "#{nowhere}#"));
        let action = Action::native("f", Signature::new(["a"]).optional("c", 3), |_, _| {
            Ok(Value::Null)
        });
        let bound = kernel
            .bind(entry, &action, vec![Value::Int(1)], &Context::new(), &Value::Unbound)
            .unwrap();
        let values: Vec<Value> = bound.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, [Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn failing_lazy_required_is_reported_missing() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new().param("~a", "#{nowhere}#"));
        let action = Action::native("f", Signature::new(["a", "b"]), |_, _| Ok(Value::Null));
        match kernel
            .bind(entry, &action, vec![], &Context::new(), &Value::Unbound)
            .unwrap_err()
        {
            Error::MissingArgument { missing, .. } => assert_eq!(missing, ["a", "b"]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn binding_reports_all_missing_required() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        match kernel
            .bind(entry, &four_params(), vec![], &Context::new(), &Value::Unbound)
            .unwrap_err()
        {
            Error::MissingArgument { missing, .. } => assert_eq!(missing, ["a", "b"]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn binding_rejects_extra_positionals() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let args = (0..5).map(Value::from).collect();
        let err = kernel
            .bind(entry, &four_params(), args, &Context::new(), &Value::Unbound)
            .unwrap_err();
        assert!(matches!(err, Error::TooManyArguments { accepted: 4, given: 5, .. }));
    }

    #[test]
    fn reserved_parameters_are_injected() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let action = Action::native(
            "who",
            Signature::new([SELF_PARAM]).optional(RECORD_PARAM, Value::Null),
            |_, _| Ok(Value::Null),
        );
        let bound = kernel
            .bind(entry, &action, vec![], &Context::new(), &Value::Unbound)
            .unwrap();
        assert_eq!(bound[0].1, Value::Entry(entry));
        assert_eq!(bound[1].1, Value::Unbound);
    }

    #[test]
    fn variadic_declarations_cannot_bind() {
        let mut kernel = Kernel::default();
        let entry = kernel.create(EntryBuilder::new());
        let action = Action::native("v", Signature::new(["a"]).variadic("rest"), |_, _| Ok(Value::Null));
        let err = kernel
            .bind(entry, &action, vec![Value::Int(1)], &Context::new(), &Value::Unbound)
            .unwrap_err();
        assert!(matches!(err, Error::VariadicUnsupported { .. }));
    }

    #[test]
    fn possible_actions_lists_own_before_builtins() {
        let mut kernel = Kernel::default();
        let table = ActionTable::new().with(echo("zzz"));
        let entry = kernel.create(EntryBuilder::new().actions(table));
        let names = kernel.possible_actions(entry).unwrap();
        assert_eq!(names[0], "zzz");
        assert!(names.iter().any(|name| name == "get"));
    }
}
