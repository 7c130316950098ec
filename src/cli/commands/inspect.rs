use anyhow::Result;

use axs::{Context, Kernel};

use super::util::{print_map, print_value, require_entry};

pub(crate) fn cmd_walk(kernel: &mut Kernel) -> Result<()> {
    let root = kernel.root_collection()?;
    for entry in kernel.walk(root)? {
        match kernel.path_of(entry) {
            Some(path) => println!("{} -> {}", kernel.name_of(entry), path.display()),
            None => println!("{}", kernel.name_of(entry)),
        }
    }
    Ok(())
}

pub(crate) fn cmd_show(kernel: &mut Kernel, name: &str) -> Result<()> {
    let entry = require_entry(kernel, name)?;
    let data = kernel.own_data(entry)?.clone();
    print_map(kernel, &data)
}

pub(crate) fn cmd_get(kernel: &mut Kernel, name: &str, param: &str) -> Result<()> {
    let entry = require_entry(kernel, name)?;
    let value = kernel.get(entry, param, &Context::new())?;
    print_value(kernel, &value)
}
