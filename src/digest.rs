//! SHA-256 digests used as call-cache keys.

use sha2::{Digest, Sha256};

use crate::context::Context;
use crate::value::{Map, Value};

/// Incremental key builder: each field is written in canonical form and
/// closed with a separator byte before it enters the hash.
struct KeyHasher {
    hasher: Sha256,
    scratch: String,
}

impl KeyHasher {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            scratch: String::new(),
        }
    }

    fn text(&mut self, text: &str) {
        self.hasher.update(text.as_bytes());
        self.hasher.update([0x1f]);
    }

    fn value(&mut self, value: &Value) {
        self.scratch.clear();
        value.write_canonical(&mut self.scratch);
        self.hasher.update(self.scratch.as_bytes());
        self.hasher.update([0x1e]);
    }

    fn context(&mut self, ctx: &Context) {
        self.scratch.clear();
        ctx.write_canonical(&mut self.scratch);
        self.hasher.update(self.scratch.as_bytes());
        self.hasher.update([0x1f]);
    }

    fn finish(self) -> String {
        self.hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

/// Cache key of a call: action name, positional arguments, the calling
/// context and the overrides (sorted by name), as lowercase hex SHA-256.
pub fn call_key(action: &str, args: &[Value], ctx: &Context, overrides: &Map) -> String {
    let mut key = KeyHasher::new();
    key.text(action);
    for arg in args {
        key.value(arg);
    }
    key.text("");
    key.context(ctx);
    let mut names: Vec<&String> = overrides.keys().collect();
    names.sort();
    for name in names {
        key.text(name);
        key.value(&overrides[name.as_str()]);
    }
    key.finish()
}
