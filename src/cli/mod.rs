mod commands;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use axs::{Kernel, KernelConfig, logging};

#[derive(Parser)]
#[command(name = "axs", version, about = "Entry resolution and execution kernel")]
struct Cli {
    /// Configuration file (defaults to $AXS_CONFIG, then ./axs.toml)
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Root collection searched by byname and byquery
    #[arg(short = 'r', long = "root", global = true, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Create a call record for every executed call
    #[arg(long = "record", global = true)]
    record: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a comma-separated pipeline of calls on the kernel entry
    ///
    /// Example: axs run byname be_like , meme "does x" smart --person=Mary
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        tokens: Vec<String>,
    },
    /// Find entries of the root collection matching a query
    Query {
        /// Comma-separated clauses, e.g. "program,lang=rust,!deprecated"
        query: String,
        /// Print every match instead of the first one
        #[arg(long)]
        all: bool,
        /// Do not fall back to producer rules when nothing matches
        #[arg(long = "no-produce")]
        no_produce: bool,
    },
    /// List every entry of the root collection in walk order
    Walk,
    /// Print the own data of a named entry
    Show { name: String },
    /// Resolve one parameter of a named entry
    Get { name: String, param: String },
}

fn kernel_from(cli: &Cli) -> Result<Kernel> {
    let mut config = KernelConfig::discover(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.root_collection = root.clone();
    }
    if cli.record {
        config.record_calls = true;
    }
    logging::init(&config.logging);
    Ok(Kernel::new(config))
}

pub(crate) fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut kernel = kernel_from(&cli)?;

    match cli.command {
        Command::Run { tokens } => commands::cmd_run(&mut kernel, &tokens),
        Command::Query {
            query,
            all,
            no_produce,
        } => commands::cmd_query(&mut kernel, &query, all, !no_produce),
        Command::Walk => commands::cmd_walk(&mut kernel),
        Command::Show { name } => commands::cmd_show(&mut kernel, &name),
        Command::Get { name, param } => commands::cmd_get(&mut kernel, &name, &param),
    }
}
