mod inspect;
mod query;
mod run;
mod util;

pub(crate) use inspect::{cmd_get, cmd_show, cmd_walk};
pub(crate) use query::cmd_query;
pub(crate) use run::cmd_run;
