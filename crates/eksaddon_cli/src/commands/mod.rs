//! CLI command definitions.
//!
//! Each subcommand maps to one application lifecycle operation. Shared
//! target selection (cluster, region, options) lives in [`TargetArgs`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use eksaddon_core::{
    Application, ApplicationOptions, AwsCliContextSource, Environment, OptionOverrides,
};
use eksaddon_installer::{CommandExecutor, HelmCli, ProcessExecutor};
use eksaddon_resource::AwsCliProvider;

pub mod install;
pub mod list;
pub mod uninstall;

/// eksaddon - install add-ons and their AWS prerequisites on EKS clusters
#[derive(Parser, Debug)]
#[command(name = "eksaddon")]
#[command(version, about = "Install add-ons and their AWS prerequisites on EKS clusters")]
#[command(long_about = r#"
eksaddon creates the IAM roles, queues and cluster mappings an add-on needs,
installs the add-on's Helm chart and applies its follow-on manifests.

COMMANDS:
  install    → Create prerequisites, install the chart, apply manifests
  uninstall  → Remove the chart, then delete everything in reverse order
  list       → Show the applications that can be installed

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or options
  3 - Template error
  4 - Resource error
  5 - Install error
  6 - Readiness timeout
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install an application on a cluster
    Install(install::InstallArgs),

    /// Remove an application and its prerequisites from a cluster
    Uninstall(uninstall::UninstallArgs),

    /// List the available applications
    List(list::ListArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Which cluster to act on and how to configure the application.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Application to act on
    #[arg(default_value = "karpenter")]
    pub application: String,

    /// Target EKS cluster name
    #[arg(short, long, env = "EKSADDON_CLUSTER")]
    pub cluster: Option<String>,

    /// AWS region of the cluster
    #[arg(short, long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// YAML file with option overrides
    #[arg(long, value_name = "PATH")]
    pub options_file: Option<PathBuf>,

    /// Override one option (repeatable), e.g. --set replicas=2
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// kubeconfig context to use instead of the current one
    #[arg(long)]
    pub kube_context: Option<String>,

    /// Output format for the result
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl TargetArgs {
    /// Application defaults, then the options file, then the command line.
    pub fn resolve_options(&self, app: &Application) -> Result<ApplicationOptions> {
        let file = match &self.options_file {
            Some(path) => OptionOverrides::from_file(path)?,
            None => OptionOverrides::new(),
        };

        let mut cli = OptionOverrides::new();
        cli.cluster_name = self.cluster.clone();
        cli.region = self.region.clone();
        for assignment in &self.set {
            cli.set_assignment(assignment)?;
        }

        let mut options = app.options();
        options.apply(&file.merge(cli));
        Ok(options)
    }

    /// Collaborators backed by the `aws`, `eksctl`, `kubectl` and `helm` CLIs.
    pub fn environment(&self, options: &ApplicationOptions) -> Environment {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessExecutor::new());
        let mut cloud = AwsCliProvider::new(executor.clone(), &options.cluster_name, &options.region);
        let mut helm = HelmCli::new(executor.clone());
        if let Some(context) = &self.kube_context {
            cloud = cloud.with_kube_context(context);
            helm = helm.with_kube_context(context);
        }
        Environment::new(
            Arc::new(AwsCliContextSource::new(executor)),
            Arc::new(cloud),
            Arc::new(helm),
        )
    }
}

/// Token cancelled on the first Ctrl-C. A second Ctrl-C exits at once.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping the readiness wait. Press Ctrl-C again to abort immediately");
        trigger.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    token
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use eksaddon_core::apps::karpenter;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn target(cli: Cli) -> TargetArgs {
        match cli.command {
            Commands::Install(args) => args.target,
            Commands::Uninstall(args) => args.target,
            Commands::List(_) => panic!("list has no target"),
        }
    }

    #[test]
    fn test_install_defaults_to_karpenter() {
        let cli = parse(&["eksaddon", "install", "--cluster", "demo", "--region", "us-east-1"]);
        let target = target(cli);
        assert_eq!(target.application, "karpenter");
        assert_eq!(target.cluster.as_deref(), Some("demo"));
        assert_eq!(target.output, OutputFormat::Text);
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["eksaddon", "-vv", "--log-format", "json", "list"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["eksaddon", "-q", "-v", "list"]).is_err());
    }

    #[test]
    fn test_command_line_wins_over_options_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cluster_name: from-file\nreplicas: 3\nversion: 1.4.0").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&[
            "eksaddon",
            "install",
            "--cluster",
            "from-flag",
            "--region",
            "eu-west-1",
            "--options-file",
            path.as_str(),
            "--set",
            "replicas=2",
            "--set",
            "ami_alias=al2023@v20250101",
        ]);
        let options = target(cli)
            .resolve_options(&karpenter::application())
            .unwrap();

        assert_eq!(options.cluster_name, "from-flag");
        assert_eq!(options.region, "eu-west-1");
        assert_eq!(options.replicas, 2);
        assert_eq!(options.version, "1.4.0");
        assert_eq!(options.settings["ami_alias"], "al2023@v20250101");
        assert_eq!(options.namespace, "karpenter");
    }

    #[test]
    fn test_bad_assignment_is_an_option_error() {
        let cli = parse(&["eksaddon", "uninstall", "--cluster", "demo", "--set", "replicas"]);
        let err = target(cli)
            .resolve_options(&karpenter::application())
            .unwrap_err();
        assert!(err.downcast_ref::<eksaddon_core::CoreError>().is_some());
    }
}
