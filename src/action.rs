//! Actions, their signatures, and the code-module format that declares them.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::context::Context;
use crate::entry::EntryId;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::markers::{CODE_DOC_KEY, CODE_MODULES_KEY};
use crate::value::Value;

pub type NativeFn = dyn Fn(&mut Kernel, &Invocation) -> Result<Value>;

/// Declared parameters: required first, then optional with defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signature {
    pub required: Vec<String>,
    pub optional: Vec<(String, Value)>,
    pub variadic: Option<String>,
}

impl Signature {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn optional(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.optional.push((name.into(), default.into()));
        self
    }

    pub fn variadic(mut self, name: impl Into<String>) -> Self {
        self.variadic = Some(name.into());
        self
    }

    pub fn arity(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .map(String::as_str)
            .chain(self.optional.iter().map(|(name, _)| name.as_str()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.required.clone();
        parts.extend(
            self.optional
                .iter()
                .map(|(name, default)| format!("{name}={}", default.canonical())),
        );
        if let Some(name) = &self.variadic {
            parts.push(format!("*{name}"));
        }
        write!(f, "({})", parts.join(", "))
    }
}

#[derive(Clone)]
pub enum ActionBody {
    Native(Rc<NativeFn>),
    /// Expression evaluated with the bound arguments as innermost scope.
    Script(Value),
}

#[derive(Clone)]
pub struct Action {
    pub name: String,
    pub doc: Option<String>,
    pub signature: Signature,
    pub body: ActionBody,
}

impl Action {
    pub fn native<F>(name: impl Into<String>, signature: Signature, body: F) -> Self
    where
        F: Fn(&mut Kernel, &Invocation) -> Result<Value> + 'static,
    {
        Self {
            name: name.into(),
            doc: None,
            signature,
            body: ActionBody::Native(Rc::new(body)),
        }
    }

    pub fn script(name: impl Into<String>, signature: Signature, body: Value) -> Self {
        Self {
            name: name.into(),
            doc: None,
            signature,
            body: ActionBody::Script(body),
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.body {
            ActionBody::Native(_) => "native",
            ActionBody::Script(_) => "script",
        };
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("kind", &kind)
            .finish()
    }
}

/// Arguments bound for one action invocation.
#[derive(Debug)]
pub struct Invocation {
    pub entry: EntryId,
    pub action: String,
    bound: Vec<(String, Value)>,
    pub ctx: Context,
    pub record: Option<EntryId>,
}

impl Invocation {
    pub(crate) fn new(
        entry: EntryId,
        action: &str,
        bound: Vec<(String, Value)>,
        ctx: Context,
        record: Option<EntryId>,
    ) -> Self {
        Self {
            entry,
            action: action.to_string(),
            bound,
            ctx,
            record,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bound
            .iter()
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    pub fn bound(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bound.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn value(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| Error::not_found("argument", format!("{}.{name}", self.action)))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        let value = self.value(name)?;
        value.as_str().ok_or_else(|| self.invalid(name, "text", value))
    }

    /// Text argument where null means "not given".
    pub fn opt_text(&self, name: &str) -> Result<Option<&str>> {
        match self.value(name)? {
            value if value.is_null() => Ok(None),
            Value::Text(text) => Ok(Some(text)),
            other => Err(self.invalid(name, "text or null", other)),
        }
    }

    pub fn entry_arg(&self, name: &str) -> Result<Option<EntryId>> {
        match self.value(name)? {
            value if value.is_null() => Ok(None),
            Value::Entry(id) => Ok(Some(*id)),
            other => Err(self.invalid(name, "an entry", other)),
        }
    }

    pub fn flag(&self, name: &str) -> Result<bool> {
        Ok(self.value(name)?.truthy())
    }

    fn invalid(&self, name: &str, expected: &'static str, found: &Value) -> Error {
        Error::InvalidArgument {
            action: self.action.clone(),
            param: name.to_string(),
            expected,
            found: found.kind().to_string(),
        }
    }
}

/// Named actions owned by an entry or a native module.
#[derive(Clone, Debug, Default)]
pub struct ActionTable {
    actions: IndexMap<String, Rc<Action>>,
    pub doc: Option<String>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn insert(&mut self, action: Action) {
        self.actions.insert(action.name.clone(), Rc::new(action));
    }

    pub fn get(&self, name: &str) -> Option<Rc<Action>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn extend_from(&mut self, other: &ActionTable) {
        for (name, action) in &other.actions {
            self.actions.insert(name.clone(), Rc::clone(action));
        }
    }
}

/// Build an action table from a parsed `code_axs.json` document.
///
/// Action definitions take one of two shapes:
///
/// * `{"native": "module.action"}` binds an action of a registered native module;
/// * `{"params": [...], "body": <expr>, "doc": "..."}` declares a script action.
///
/// Parameter declarations are `"name"` (required), `{"name": default}`
/// (optional) and `"*name"` (variadic). The `_modules` key imports every
/// action of the listed native modules.
pub(crate) fn parse_code(
    json: JsonValue,
    modules: &HashMap<String, Rc<ActionTable>>,
    path: &Path,
) -> Result<ActionTable> {
    let malformed = |reason: String| Error::MalformedCode {
        path: path.to_path_buf(),
        reason,
    };
    let JsonValue::Object(map) = json else {
        return Err(malformed("top level must be an object".into()));
    };

    let mut table = ActionTable::new();
    for (name, def) in map {
        match name.as_str() {
            CODE_DOC_KEY => table.doc = def.as_str().map(str::to_string),
            CODE_MODULES_KEY => {
                let JsonValue::Array(names) = def else {
                    return Err(malformed(format!("`{CODE_MODULES_KEY}` must be a list")));
                };
                for module in names {
                    let module = module.as_str().unwrap_or_default();
                    let found = modules
                        .get(module)
                        .ok_or_else(|| malformed(format!("unknown native module `{module}`")))?;
                    table.extend_from(found);
                }
            }
            _ => {
                let action = parse_action(&name, def, modules).map_err(malformed)?;
                table.insert(action);
            }
        }
    }
    Ok(table)
}

fn parse_action(
    name: &str,
    def: JsonValue,
    modules: &HashMap<String, Rc<ActionTable>>,
) -> std::result::Result<Action, String> {
    let JsonValue::Object(mut def) = def else {
        return Err(format!("action `{name}` must be an object"));
    };

    if let Some(native) = def.remove("native") {
        let target = native
            .as_str()
            .ok_or_else(|| format!("action `{name}`: `native` must be text"))?;
        let (module, action) = target
            .split_once('.')
            .ok_or_else(|| format!("action `{name}`: `{target}` is not `module.action`"))?;
        let found = modules
            .get(module)
            .and_then(|table| table.get(action))
            .ok_or_else(|| format!("action `{name}`: native `{target}` is not registered"))?;
        return Ok(found.renamed(name));
    }

    let signature = match def.remove("params") {
        None => Signature::default(),
        Some(JsonValue::Array(params)) => parse_signature(name, params)?,
        Some(_) => return Err(format!("action `{name}`: `params` must be a list")),
    };
    let body = def
        .remove("body")
        .ok_or_else(|| format!("action `{name}` has neither `native` nor `body`"))?;
    let mut action = Action::script(name, signature, Value::from_json(body));
    if let Some(JsonValue::String(doc)) = def.remove("doc") {
        action = action.with_doc(doc);
    }
    Ok(action)
}

fn parse_signature(name: &str, params: Vec<JsonValue>) -> std::result::Result<Signature, String> {
    let mut signature = Signature::default();
    for param in params {
        match param {
            JsonValue::String(param) => {
                if let Some(variadic) = param.strip_prefix('*') {
                    signature.variadic = Some(variadic.to_string());
                } else if signature.optional.is_empty() {
                    signature.required.push(param);
                } else {
                    return Err(format!(
                        "action `{name}`: required `{param}` follows an optional parameter"
                    ));
                }
            }
            JsonValue::Object(map) if map.len() == 1 => {
                for (param, default) in map {
                    signature.optional.push((param, Value::from_json(default)));
                }
            }
            other => return Err(format!("action `{name}`: bad parameter declaration {other}")),
        }
    }
    Ok(signature)
}
