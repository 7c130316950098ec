//! axs: entries with inheritable parameters and actions, stored as
//! directories of JSON and organized into collections.

pub mod action;
mod builtins;
pub mod call;
pub mod collection;
pub mod config;
pub mod context;
pub mod digest;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod logging;
pub mod markers;
pub mod params;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod value;

pub use action::{Action, ActionBody, ActionTable, Invocation, NativeFn, Signature};
pub use call::{CallOutcome, CallRequest};
pub use collection::WalkCursor;
pub use config::{KernelConfig, LoggingConfig};
pub use context::{Context, Scope};
pub use dispatch::{Origin, Reached};
pub use entry::{EntryBuilder, EntryId};
pub use error::{Error, Result};
pub use kernel::{KERNEL_NAME, Kernel, VERSION};
pub use pipeline::{Pipeline, Step, StepCall};
pub use query::{Clause, CompareOp, Query, UnaryOp};
pub use store::{CollisionPolicy, load_params, normalize_path, write_params};
pub use value::{Map, Value};
