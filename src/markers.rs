//! Reserved markers and parameter names recognised by the kernel.

/// Head of a deferred call evaluated on the requesting entry.
pub const SELF_CALL: &str = "^^";
/// Head of a deferred call evaluated on the kernel entry.
pub const KERNEL_CALL: &str = "^";
/// List head or map key that stops interpretation of the wrapped data.
pub const ESCAPE: &str = "AS^IS";
/// Prefix of a lazy parameter, recomputed on every lookup.
pub const LAZY_PREFIX: &str = "~";

/// Resolves to the requesting entry itself.
pub const SELF_PARAM: &str = "__entry__";
/// Resolves to the call record of the current call, if one is produced.
pub const RECORD_PARAM: &str = "__record_entry__";

pub const PARENTS_KEY: &str = "_parent_entries";
pub const CONTAINED_KEY: &str = "contained_entries";
pub const TAGS_KEY: &str = "tags";
pub const PRODUCER_RULES_KEY: &str = "_producer_rules";
pub const RESULT_KEY: &str = "__result__";
pub const REPLAY_KEY: &str = "_replay";

pub const PARAMS_FILE: &str = "data_axs.json";
pub const CODE_FILE: &str = "code_axs.json";

/// Keys of a code module that are not action definitions.
pub const CODE_DOC_KEY: &str = "_doc";
pub const CODE_MODULES_KEY: &str = "_modules";

pub fn is_reserved_param(name: &str) -> bool {
    name == SELF_PARAM || name == RECORD_PARAM
}
