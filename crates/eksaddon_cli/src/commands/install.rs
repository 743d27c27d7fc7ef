//! Install command - create prerequisites, install the chart, apply manifests.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::info;

use eksaddon_core::{
    apps, Application, ApplicationOptions, InstallOutcome, InstallPlan, StaticContextSource,
};
use eksaddon_resource::{CreateParams, EnsureAction, ResolvedResource, ResourceKind};

use super::{cancel_on_ctrl_c, print_json, OutputFormat, TargetArgs};

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Render everything and print it without changing anything
    #[arg(long, env = "EKSADDON_DRY_RUN")]
    pub dry_run: bool,

    /// Render against this account instead of asking AWS (dry run only)
    #[arg(long, requires = "dry_run")]
    pub account: Option<String>,

    /// Partition used with --account
    #[arg(long, requires = "account", default_value = "aws")]
    pub partition: String,

    /// OIDC issuer URL used with --account
    #[arg(long, requires = "account")]
    pub oidc_issuer: Option<String>,
}

pub async fn execute(args: InstallArgs) -> Result<()> {
    let app = apps::builtin_registry().get_required(&args.target.application)?;
    let options = args.target.resolve_options(&app)?;
    options.validate()?;
    let mut env = args.target.environment(&options);

    if args.dry_run {
        if let Some(account) = &args.account {
            let mut source = StaticContextSource::new(&args.partition, &options.region, account);
            if let Some(issuer) = &args.oidc_issuer {
                source = source.with_oidc_issuer(issuer);
            }
            env.context_source = Arc::new(source);
        }
        info!("Dry run: rendering {} for cluster {}", app.name, options.cluster_name);
        let plan = app.plan(&env, &options).await?;
        return match args.target.output {
            OutputFormat::Json => print_json(&PlanView::new(&app, &options, &plan)),
            OutputFormat::Text => {
                print_plan(&app, &options, &plan);
                Ok(())
            }
        };
    }

    let cancel = cancel_on_ctrl_c();
    let outcome = app.install(&env, &options, &cancel).await?;
    match args.target.output {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Text => print_outcome(&app, &options, &outcome),
    }
    Ok(())
}

#[derive(Serialize)]
struct ResourceView<'a> {
    name: &'a str,
    kind: ResourceKind,
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document: Option<&'a str>,
}

impl<'a> ResourceView<'a> {
    fn new(resource: &'a ResolvedResource) -> Self {
        let document = match &resource.params {
            CreateParams::Manifest { document, .. } | CreateParams::Policy { document, .. } => {
                Some(document.as_str())
            }
            _ => None,
        };
        Self {
            name: &resource.name,
            kind: resource.kind,
            key: &resource.key,
            document,
        }
    }
}

/// What a dry run prints with `--output json`.
#[derive(Serialize)]
struct PlanView<'a> {
    application: &'a str,
    cluster: &'a str,
    release: &'a str,
    namespace: &'a str,
    chart: String,
    dependencies: Vec<ResourceView<'a>>,
    values: &'a str,
    post_install: Vec<ResourceView<'a>>,
}

impl<'a> PlanView<'a> {
    fn new(app: &'a Application, options: &'a ApplicationOptions, plan: &'a InstallPlan) -> Self {
        Self {
            application: &app.name,
            cluster: &options.cluster_name,
            release: &plan.coordinates.release,
            namespace: &plan.coordinates.namespace,
            chart: plan.coordinates.chart_label(),
            dependencies: plan.dependencies.iter().map(ResourceView::new).collect(),
            values: plan.values.as_str(),
            post_install: plan.post_install.iter().map(ResourceView::new).collect(),
        }
    }
}

fn print_plan(app: &Application, options: &ApplicationOptions, plan: &InstallPlan) {
    println!("📋 Plan for {} on cluster {}", app.name, options.cluster_name);
    println!();
    println!("Dependencies (in creation order):");
    for resource in &plan.dependencies {
        println!("   - {} [{}] {}", resource.name, resource.kind, resource.key);
    }
    println!();
    println!(
        "Release {} in namespace {} from {} ({})",
        plan.coordinates.release,
        plan.coordinates.namespace,
        plan.coordinates.repository,
        plan.coordinates.chart_label()
    );
    println!("---");
    print!("{}", plan.values);
    println!("---");
    println!();
    println!("After install:");
    for resource in &plan.post_install {
        println!("   - {} [{}] {}", resource.name, resource.kind, resource.key);
        if let CreateParams::Manifest { document, .. } = &resource.params {
            println!("---");
            print!("{}", document);
        }
    }
}

fn print_outcome(app: &Application, options: &ApplicationOptions, outcome: &InstallOutcome) {
    for report in outcome.dependencies.iter().chain(&outcome.post_install) {
        let marker = match report.action {
            EnsureAction::Created => "➕",
            EnsureAction::AlreadyPresent => "✔️ ",
        };
        println!("   {} {} [{}] {}", marker, report.name, report.kind, report.identifier);
    }
    println!();
    println!(
        "✅ {} installed on {} ({}, {:?}, {})",
        app.name,
        options.cluster_name,
        outcome.release.chart,
        outcome.release.action,
        outcome.release.state
    );
}
