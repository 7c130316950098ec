//! Error taxonomy shared by every kernel operation.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Parameter, parent, entry or child lookup miss.
    #[error("{kind} `{name}` not found")]
    NotFound { kind: &'static str, name: String },

    #[error(
        "could not find the action `{action}` among the ancestors ({}) nor in the built-in set",
        .searched.join(", ")
    )]
    ActionNotFound { action: String, searched: Vec<String> },

    #[error("action `{action}` is missing required arguments: {}", .missing.join(", "))]
    MissingArgument { action: String, missing: Vec<String> },

    #[error("action `{action}` accepts at most {accepted} arguments, {given} given")]
    TooManyArguments {
        action: String,
        accepted: usize,
        given: usize,
    },

    #[error("action `{action}` declares variadic parameter `*{param}`, which cannot be bound")]
    VariadicUnsupported { action: String, param: String },

    #[error("action `{action}` expected `{param}` to be {expected}, found {found}")]
    InvalidArgument {
        action: String,
        param: String,
        expected: &'static str,
        found: String,
    },

    #[error("could not parse query clause `{clause}`: {reason}")]
    MalformedQuery { clause: String, reason: String },

    #[error("malformed expression {expression}: {reason}")]
    MalformedExpression { expression: String, reason: String },

    #[error("malformed code module {}: {reason}", .path.display())]
    MalformedCode { path: PathBuf, reason: String },

    #[error("persistence conflict at {}: {reason}", .path.display())]
    PersistenceConflict { path: PathBuf, reason: String },

    #[error("entry `{entry}` has no storage path")]
    Unstorable { entry: String },

    #[error("cycle detected: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("parent reference of `{entry}` resolved to {found}, not an entry")]
    InvalidParent { entry: String, found: String },

    #[error("child `{name}` of collection `{collection}` is invalid: {reason}")]
    InvalidChild {
        collection: String,
        name: String,
        reason: String,
    },

    /// Failure signalled explicitly by an action.
    #[error("{message}")]
    Raised { message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn raised(message: impl Into<String>) -> Self {
        Error::Raised {
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed_expression(expression: impl ToString, reason: impl Into<String>) -> Self {
        Error::MalformedExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// True for recoverable lookup misses that API boundaries turn into `None`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::ActionNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_argument_lists_every_name() {
        let err = Error::MissingArgument {
            action: "meme".into(),
            missing: vec!["does".into(), "quality".into()],
        };
        assert_eq!(
            err.to_string(),
            "action `meme` is missing required arguments: does, quality"
        );
    }

    #[test]
    fn not_found_is_recoverable() {
        assert!(Error::not_found("parameter", "x").is_not_found());
        assert!(!Error::raised("boom").is_not_found());
    }
}
