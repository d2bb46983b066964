//! Ratchet - iteration control for autonomous coding agents
//!
//! Command line access to plan versioning, diffing, failure classification
//! and one-shot replanning.

use clap::{Parser, Subcommand};
use colored::Colorize;
use ratchet::plan::{compute_diff, load_plans};
use ratchet::{
    ClaudeAgent, FailureClassifier, FeatureId, PlanVersioner, RatchetError, ReplanManager,
    Result, RunConfig, StrategyType, TriggerType,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ratchet")]
#[command(version)]
#[command(about = "Iteration control for autonomous coding agents", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List plan backups
    Versions {
        /// Plan file, relative to the project directory
        #[arg(long, default_value = "plans.json")]
        plan: PathBuf,
    },

    /// Restore a plan backup over the live plan
    Restore {
        /// Version number to restore (1 is the oldest)
        #[arg(value_name = "VERSION")]
        number: usize,

        /// Plan file, relative to the project directory
        #[arg(long, default_value = "plans.json")]
        plan: PathBuf,
    },

    /// Show the differences between two plan files
    Diff {
        /// Older plan file
        old: PathBuf,

        /// Newer plan file
        new: PathBuf,
    },

    /// Classify agent output read from stdin
    Classify {
        /// Exit status of the attempt
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        exit_code: i32,

        /// Print the failure as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one replan against the plan file
    Replan {
        /// Plan file, relative to the project directory
        #[arg(long, default_value = "plans.json")]
        plan: PathBuf,

        /// Trigger to replan for: test_failure, requirement_change, blocked_feature or manual
        #[arg(short, long, default_value = "manual")]
        trigger: TriggerType,

        /// Strategy: incremental or agent (defaults to the configured one)
        #[arg(short, long)]
        strategy: Option<StrategyType>,

        /// Feature the replan is about
        #[arg(long)]
        feature: Option<FeatureId>,

        /// Consecutive failures of that feature
        #[arg(long, default_value = "0")]
        failures: u32,

        /// Blocked features (comma separated)
        #[arg(long, value_delimiter = ',')]
        blocked: Vec<FeatureId>,
    },

    /// Show the effective run configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "ratchet=debug,info"
    } else {
        "ratchet=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        return Err(RatchetError::config(format!(
            "Project directory does not exist: {}",
            project_path.display()
        )));
    }

    match cli.command {
        Commands::Versions { plan } => {
            let plan_path = resolve(&project_path, &plan);
            let versioner = PlanVersioner::new(&plan_path)?;

            if versioner.versions().is_empty() {
                println!("No backups for {}", plan_path.display());
                return Ok(());
            }

            println!("{} {}", "Plan backups:".cyan().bold(), plan_path.display());
            println!("{}", "─".repeat(40));
            for version in versioner.versions() {
                println!("   {}", version.summary());
            }
        }

        Commands::Restore { number, plan } => {
            let plan_path = resolve(&project_path, &plan);
            let versioner = PlanVersioner::new(&plan_path)?;
            versioner.restore_version(number)?;
            println!(
                "{} Restored v{} to {}",
                "OK".green().bold(),
                number,
                plan_path.display()
            );
        }

        Commands::Diff { old, new } => {
            let old = load_plans(&resolve(&project_path, &old))?;
            let new = load_plans(&resolve(&project_path, &new))?;
            let diff = compute_diff(&old, &new);
            if diff.is_empty() {
                println!("{}", "No changes".green());
            } else {
                print!("{}", diff);
            }
        }

        Commands::Classify { exit_code, json } => {
            let mut output = String::new();
            std::io::stdin().read_to_string(&mut output)?;

            let config = RunConfig::load(&project_path)?;
            let classifier =
                FailureClassifier::new().with_max_excerpt_chars(config.max_output_chars);

            match classifier.classify(&output, exit_code, 0, 0) {
                None if json => println!("null"),
                None => println!("{} No failure detected", "OK".green().bold()),
                Some(failure) if json => {
                    println!("{}", serde_json::to_string_pretty(&failure)?);
                }
                Some(failure) => {
                    println!("{} {}", "Failure:".red().bold(), failure.kind);
                    println!("   {}", failure.kind.description());
                    println!("   {}", failure.message);
                }
            }
        }

        Commands::Replan {
            plan,
            trigger,
            strategy,
            feature,
            failures,
            blocked,
        } => {
            let plan_path = resolve(&project_path, &plan);
            let config = RunConfig::load(&project_path)?;
            let strategy = strategy.unwrap_or(config.replan_strategy);

            let mut manager = ReplanManager::from_config(&plan_path, &config)?;
            if strategy == StrategyType::AgentBased {
                let agent = ClaudeAgent::from_config(&project_path, &config);
                manager = manager.with_agent(Arc::new(agent));
            }

            for id in blocked {
                manager.mark_blocked(id);
            }
            if let Some(id) = feature {
                let plans = manager.state().plans.clone();
                manager.update_state(id, failures, Vec::new(), plans);
            }

            let result = manager.execute_replan(strategy, trigger).await?;
            if result.success {
                println!("{} {}", "Replanned:".green().bold(), result.message);
            } else {
                println!("{} {}", "Not replanned:".yellow().bold(), result.message);
            }
            if let Some(diff) = result.diff.as_ref().filter(|d| !d.is_empty()) {
                print!("{}", diff);
            }
            if let Some(backup) = &result.old_plan_path {
                println!("   Backup: {}", backup.display());
            }
        }

        Commands::Config => {
            let config = RunConfig::load(&project_path)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn resolve(project: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project.join(path)
    }
}
