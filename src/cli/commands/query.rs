use anyhow::Result;

use axs::{Kernel, Query};

pub(crate) fn cmd_query(kernel: &mut Kernel, text: &str, all: bool, produce: bool) -> Result<()> {
    let query = Query::parse(text)?;
    if all {
        let root = kernel.root_collection()?;
        let found = kernel.all_byquery_in(root, &query)?;
        if found.is_empty() {
            println!("no entries match `{query}`");
        }
        for entry in found {
            println!("{}", kernel.name_of(entry));
        }
        return Ok(());
    }
    match kernel.byquery(&query, produce)? {
        Some(entry) => match kernel.path_of(entry) {
            Some(path) => println!("{} -> {}", kernel.name_of(entry), path.display()),
            None => println!("{}", kernel.name_of(entry)),
        },
        None => println!("no entries match `{query}`"),
    }
    Ok(())
}
