use anyhow::Result;

use axs::{Context, Kernel, Map};

use super::util::{parse_pipeline_tokens, print_value};

pub(crate) fn cmd_run(kernel: &mut Kernel, tokens: &[String]) -> Result<()> {
    let pipeline = parse_pipeline_tokens(tokens)?;
    let owner = kernel.kernel_entry();
    let result = kernel.execute(owner, &pipeline, Map::new(), &Context::new())?;
    print_value(kernel, &result)
}
