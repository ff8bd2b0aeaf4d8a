//! trustchain - plan and inspect private-CA backed workload identity federation

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use trustchain::config::DeploymentConfig;
use trustchain::graph::standard_graph;
use trustchain::policy::{inference_policy, trust_policy};
use trustchain::telemetry::{init_tracing, LogFormat};

/// trustchain - dependency-ordered provisioning of certificate-based federation
#[derive(Parser, Debug)]
#[command(name = "trustchain", version, about, long_about = None)]
struct Cli {
    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "TRUSTCHAIN_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the execution plan
    ///
    /// Kinds are grouped into waves: every kind in a wave has all of its
    /// prerequisites in earlier waves, so a wave runs concurrently.
    Plan(ConfigArgs),

    /// Print the rendered permission documents
    Policy(PolicyArgs),

    /// Validate a deployment file and its dependency graph
    Validate(ConfigArgs),
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Path to the deployment YAML file
    #[arg(short = 'f', long = "config", env = "TRUSTCHAIN_CONFIG")]
    config_file: PathBuf,
}

#[derive(Parser, Debug)]
struct PolicyArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Which document to print
    #[arg(long, value_enum, default_value_t = PolicyKind::All)]
    document: PolicyKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    /// Role trust policy
    Trust,
    /// Inference permissions policy
    Permissions,
    /// Both documents
    All,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Plan(args) => run_plan(&args),
        Commands::Policy(args) => run_policy(&args),
        Commands::Validate(args) => run_validate(&args),
    }
}

fn load(args: &ConfigArgs) -> anyhow::Result<DeploymentConfig> {
    DeploymentConfig::load(&args.config_file)
        .with_context(|| format!("invalid deployment file {}", args.config_file.display()))
}

fn run_plan(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load(args)?;
    let graph = standard_graph(&config)?;
    let waves = graph.waves()?;

    println!(
        "Stack {} in {} ({})",
        config.stack_name,
        config.region,
        config.partition()
    );
    for (idx, wave) in waves.iter().enumerate() {
        println!("wave {}:", idx + 1);
        for kind in wave {
            let prerequisites = graph
                .prerequisites(*kind)
                .map(|p| p.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            match config.tags.get(kind) {
                Some(tags) if !tags.is_empty() => println!(
                    "  {:<16} after [{}] tags {:?}",
                    kind.as_str(),
                    prerequisites,
                    tags
                ),
                _ => println!("  {:<16} after [{}]", kind.as_str(), prerequisites),
            }
        }
    }
    Ok(())
}

fn run_policy(args: &PolicyArgs) -> anyhow::Result<()> {
    let config = load(&args.config)?;
    let arns = config.arn_context();

    if matches!(args.document, PolicyKind::Trust | PolicyKind::All) {
        let document = trust_policy(arns.partition);
        document.validate()?;
        println!("{}", document.to_json_pretty()?);
    }
    if matches!(args.document, PolicyKind::Permissions | PolicyKind::All) {
        let document = inference_policy(&arns, &config.access.foundation_models);
        document.validate()?;
        println!("{}", document.to_json_pretty()?);
    }
    Ok(())
}

fn run_validate(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load(args)?;
    let graph = standard_graph(&config)?;
    graph.topological_order()?;
    info!(
        stack = %config.stack_name,
        steps = graph.len(),
        "Deployment is valid"
    );
    println!("{}: valid ({} steps)", args.config_file.display(), graph.len());
    Ok(())
}
