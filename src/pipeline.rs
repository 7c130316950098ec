//! Multi-step pipelines that pass results between calls.

use tracing::{error, info};

use crate::call::CallRequest;
use crate::context::Context;
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::value::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct StepCall {
    /// Explicit target; otherwise the current pipeline target.
    pub target: Option<EntryId>,
    pub action: String,
    pub args: Vec<Value>,
    pub overrides: Map,
    /// Pipeline-wide name under which the result is published.
    pub output_label: Option<String>,
    /// Pipeline-wide name under which the call record is published.
    pub input_label: Option<String>,
}

impl StepCall {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            target: None,
            action: action.into(),
            args: Vec::new(),
            overrides: Map::new(),
            output_label: None,
            input_label: None,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn on(mut self, target: EntryId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.output_label = Some(label.into());
        self
    }

    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.input_label = Some(label.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    Call(StepCall),
    /// Insert the previous result at this positional index of the next call.
    PassPositional(usize),
    /// Pass the previous result to the next call under this name.
    PassNamed(String),
    /// Send later steps back to the pipeline owner.
    Reset,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn call(self, call: StepCall) -> Self {
        self.step(Step::Call(call))
    }

    /// Read the data form: a list whose items are call lists
    /// `[action, args?, overrides?, output_label?, input_label?]`, optionally
    /// led by a target entry, integers, names, or empty lists.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::List(items) = value else {
            return Err(Error::malformed_expression(value, "pipeline must be a list"));
        };
        let mut pipeline = Pipeline::new();
        for item in items {
            let step = match item {
                Value::Int(pos) => {
                    let pos = usize::try_from(*pos).map_err(|_| {
                        Error::malformed_expression(item, "negative argument position")
                    })?;
                    Step::PassPositional(pos)
                }
                Value::Text(name) => Step::PassNamed(name.clone()),
                Value::List(parts) if parts.is_empty() => Step::Reset,
                Value::List(parts) => Step::Call(parse_call(item, parts)?),
                other => return Err(Error::malformed_expression(other, "unknown pipeline step")),
            };
            pipeline.steps.push(step);
        }
        Ok(pipeline)
    }
}

fn parse_call(whole: &Value, parts: &[Value]) -> Result<StepCall> {
    let (target, parts) = match parts.first() {
        Some(Value::Entry(id)) => (Some(*id), &parts[1..]),
        _ => (None, parts),
    };
    let action = match parts.first() {
        Some(Value::Text(action)) => action.clone(),
        _ => return Err(Error::malformed_expression(whole, "step needs an action name")),
    };
    let args = match parts.get(1) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::List(args)) => args.clone(),
        Some(single) => vec![single.clone()],
    };
    let overrides = match parts.get(2) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Map(map)) => map.clone(),
        Some(_) => return Err(Error::malformed_expression(whole, "overrides must be a map")),
    };
    let label = |idx: usize| match parts.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(label)) => Ok(Some(label.clone())),
        Some(_) => Err(Error::malformed_expression(whole, "labels must be text")),
    };
    Ok(StepCall {
        target,
        action,
        args,
        overrides,
        output_label: label(3)?,
        input_label: label(4)?,
    })
}

/// Structured values are escaped before being handed to the next step.
fn protect(value: Value) -> Value {
    match value {
        Value::List(_) | Value::Map(_) => Value::escaped(value),
        other => other,
    }
}

/// Published results are coerced the way command-line literals are.
fn coerce_label(value: Value) -> Value {
    match value {
        Value::Text(text) => Value::coerce_scalar(&text),
        other => other,
    }
}

enum Pass {
    Positional(usize),
    Named(String),
}

impl Kernel {
    /// Run `pipeline` on behalf of `owner` and return the last result.
    pub fn execute(
        &mut self,
        owner: EntryId,
        pipeline: &Pipeline,
        pipeline_wide: Map,
        ctx: &Context,
    ) -> Result<Value> {
        self.pipeline_counter += 1;
        let run = self.pipeline_counter;
        let mut shared = pipeline_wide;
        let mut current = owner;
        let mut result = Value::Entry(owner);
        let mut pending: Option<(Pass, Value)> = None;

        for (idx, step) in pipeline.steps.iter().enumerate() {
            let call = match step {
                Step::PassPositional(pos) => {
                    pending = Some((Pass::Positional(*pos), protect(result.clone())));
                    current = owner;
                    continue;
                }
                Step::PassNamed(name) => {
                    pending = Some((Pass::Named(name.clone()), protect(result.clone())));
                    current = owner;
                    continue;
                }
                Step::Reset => {
                    current = owner;
                    continue;
                }
                Step::Call(call) => call,
            };

            let mut request = CallRequest::new(call.action.as_str())
                .args(call.args.clone())
                .overrides(call.overrides.clone());
            match pending.take() {
                Some((Pass::Positional(pos), value)) => {
                    let pos = pos.min(request.args.len());
                    request.args.insert(pos, value);
                }
                Some((Pass::Named(name), value)) => {
                    request.overrides.insert(name, value);
                }
                None => {}
            }

            let target = call.target.unwrap_or(current);
            info!(
                pipeline = run,
                step = idx,
                entry = %self.name_of(target),
                action = %call.action,
                "running pipeline step"
            );
            let step_ctx = ctx.with_scope(shared.clone());
            let outcome = self.call_with(target, request, &step_ctx).inspect_err(|err| {
                error!(pipeline = run, step = idx, "pipeline step failed: {err}");
            })?;

            if let Some(label) = &call.input_label {
                let record = outcome.record.map_or(Value::Unbound, Value::Entry);
                shared.insert(label.clone(), record);
            }
            if let Some(label) = &call.output_label {
                shared.insert(label.clone(), coerce_label(outcome.value.clone()));
            }
            current = match outcome.value {
                Value::Entry(id) => id,
                _ => owner,
            };
            result = outcome.value;
        }
        Ok(result)
    }
}
