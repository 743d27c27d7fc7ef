//! List command - show the built-in applications.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use eksaddon_core::apps;

use super::{print_json, OutputFormat};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Serialize)]
struct Entry<'a> {
    name: &'a str,
    description: &'a str,
}

pub async fn execute(args: ListArgs) -> Result<()> {
    let registry = apps::builtin_registry();
    let entries: Vec<Entry> = registry
        .list()
        .into_iter()
        .map(|(name, description)| Entry { name, description })
        .collect();

    match args.output {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => {
            println!("Available applications:");
            for entry in &entries {
                println!("   {:<12} {}", entry.name, entry.description);
            }
        }
    }
    Ok(())
}
