//! Uninstall command - remove the chart, then tear down in reverse order.

use anyhow::Result;
use clap::Args;

use eksaddon_core::apps;
use eksaddon_installer::RemoveOutcome;
use eksaddon_resource::TeardownAction;

use super::{print_json, OutputFormat, TargetArgs};

#[derive(Args, Debug)]
pub struct UninstallArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

pub async fn execute(args: UninstallArgs) -> Result<()> {
    let app = apps::builtin_registry().get_required(&args.target.application)?;
    let options = args.target.resolve_options(&app)?;
    options.validate()?;
    let env = args.target.environment(&options);

    let outcome = app.uninstall(&env, &options).await?;

    if args.target.output == OutputFormat::Json {
        return print_json(&outcome);
    }
    match outcome.release {
        RemoveOutcome::Removed => println!("   ➖ release {}", app.installer.release_name),
        RemoveOutcome::AlreadyAbsent => {
            println!("   ✔️  release {} was not installed", app.installer.release_name)
        }
    }
    for report in &outcome.resources {
        let marker = match report.action {
            TeardownAction::Deleted => "➖",
            TeardownAction::AlreadyAbsent => "✔️ ",
        };
        println!("   {} {} [{}]", marker, report.name, report.kind);
    }
    println!();
    println!("✅ {} removed from {}", app.name, options.cluster_name);
    Ok(())
}
