mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nodeflow_core::config::{dirs_home, AppConfig};
use nodeflow_core::graph::{GraphPayload, Script};
use nodeflow_core::types::ExecutionId;
use nodeflow_engine::{run_with_repeat, BestEffortSink, RunDriver, RunNode, RunReport, RunRequest};
use nodeflow_handlers::default_registry;
use nodeflow_store::{build_connections, GraphRepository};

#[derive(Parser)]
#[command(name = "nodeflow", version, about = "Workflow graph engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "NODEFLOW_CONFIG", default_value = "nodeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Run system health checks
    Doctor,
    /// Manage scripts
    Script {
        #[command(subcommand)]
        action: ScriptAction,
    },
    /// Replace a script's graph with a JSON file ({nodes, connections})
    Import {
        /// Script name or id
        script: String,
        /// Graph JSON file
        file: PathBuf,
        /// Create the script if it does not exist
        #[arg(long)]
        create: bool,
    },
    /// Print a script's graph as JSON
    Export {
        /// Script name or id
        script: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a script's nodes in order
    Run {
        /// Script name or id
        script: String,
        /// Comma-separated node ids to run, in order (default: stored order)
        #[arg(long, value_delimiter = ',')]
        nodes: Option<Vec<String>>,
        /// Execution id to log under (generated if not provided)
        #[arg(long)]
        execution_id: Option<String>,
        /// Request parallel execution (not supported)
        #[arg(long)]
        parallel: bool,
        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List registered node handlers
    Handlers,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ScriptAction {
    /// Create an empty script
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List scripts
    List,
    /// Show a script and its nodes
    Show {
        /// Script name or id
        script: String,
    },
    /// Delete a script and all of its nodes
    Delete {
        /// Script name or id
        script: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "nodeflow", &mut std::io::stdout());
        return Ok(());
    }

    let (config, config_source) = load_config(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_target(false)
        .init();

    match &config_source {
        Some(path) => info!(path = %path.display(), "Loaded config"),
        None => info!("No config file found, using defaults"),
    }

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Doctor => {
            println!("nodeflow doctor");
            println!("===============");
            doctor::run_doctor(&config, config_source.as_deref());
        }
        Commands::Script { action } => {
            let repo = open_repository(&config)?;
            handle_script_cli(&repo, &config, action)?;
        }
        Commands::Import {
            script,
            file,
            create,
        } => {
            let repo = open_repository(&config)?;
            let script = match lookup_script(&repo, &script)? {
                Some(s) => s,
                None if create => repo.create_script(&script, None)?,
                None => return Err(anyhow!("script '{}' not found (use --create)", script)),
            };

            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let payload: GraphPayload = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", file.display()))?;
            let connections = if payload.connections.is_empty() {
                build_connections(&payload.nodes)
            } else {
                payload.connections
            };

            let saved = repo.save(script.id, &payload.nodes, &connections)?;
            println!(
                "Imported {} nodes and {} connections into '{}'",
                saved.len(),
                connections.len(),
                script.name
            );
        }
        Commands::Export { script, output } => {
            let repo = open_repository(&config)?;
            let registry = default_registry(&config.handlers);
            let script = require_script(&repo, &script)?;
            let graph = repo.load_graph(script.id, &registry)?;
            let json = serde_json::to_string_pretty(&graph)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Exported '{}' to {}", script.name, path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Run {
            script,
            nodes,
            execution_id,
            parallel,
            json,
        } => {
            let repo = open_repository(&config)?;
            let script = require_script(&repo, &script)?;
            let execution_id = match execution_id {
                Some(raw) => ExecutionId::parse(&raw)
                    .ok_or_else(|| anyhow!("execution id must not be blank"))?,
                None => ExecutionId::generate(),
            };

            let report = run_script(
                &repo,
                &config,
                &script,
                nodes,
                execution_id,
                parallel || config.engine.parallel,
            )
            .await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.success {
                std::process::exit(1);
            }
        }
        Commands::Handlers => {
            let registry = default_registry(&config.handlers);
            for name in registry.list() {
                let description = registry.get(name).map(|h| h.description()).unwrap_or("");
                println!("  {:<18} {}", name, description);
            }
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

/// Config file from the given path, then `~/.nodeflow/config.toml`, then
/// built-in defaults.
fn load_config(path: &Path) -> anyhow::Result<(AppConfig, Option<PathBuf>)> {
    if path.exists() {
        return Ok((AppConfig::load(path)?, Some(path.to_path_buf())));
    }
    let home_config = dirs_home().map(|h| h.join(".nodeflow").join("config.toml"));
    match home_config {
        Some(home) if home.exists() => Ok((AppConfig::load(&home)?, Some(home))),
        _ => Ok((AppConfig::default(), None)),
    }
}

fn open_repository(config: &AppConfig) -> anyhow::Result<GraphRepository> {
    let path = config.database_path();
    let repo = GraphRepository::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(repo.with_strip_data_fields(config.storage.strip_data_fields.clone()))
}

/// Find a script by numeric id or by name.
fn lookup_script(repo: &GraphRepository, key: &str) -> anyhow::Result<Option<Script>> {
    if let Ok(id) = key.parse::<i64>() {
        match repo.get_script(id) {
            Ok(script) => return Ok(Some(script)),
            Err(nodeflow_core::error::NodeflowError::ScriptNotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(repo.find_script(key)?)
}

fn require_script(repo: &GraphRepository, key: &str) -> anyhow::Result<Script> {
    lookup_script(repo, key)?.ok_or_else(|| anyhow!("script '{}' not found", key))
}

fn handle_script_cli(
    repo: &GraphRepository,
    config: &AppConfig,
    action: ScriptAction,
) -> anyhow::Result<()> {
    match action {
        ScriptAction::Create { name, description } => {
            let script = repo.create_script(&name, description.as_deref())?;
            println!("Created script '{}' (id {})", script.name, script.id);
        }
        ScriptAction::List => {
            let scripts = repo.list_scripts()?;
            if scripts.is_empty() {
                println!("No scripts.");
            }
            for s in scripts {
                println!(
                    "  {:>4}  {:<24} updated {}",
                    s.id,
                    s.name,
                    s.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        ScriptAction::Show { script } => {
            let script = require_script(repo, &script)?;
            let registry = default_registry(&config.handlers);
            let graph = repo.load_graph(script.id, &registry)?;

            println!("{} (id {})", script.name, script.id);
            if let Some(desc) = &script.description {
                println!("  {}", desc);
            }
            println!("  created {}", script.created_at.to_rfc3339());
            println!("  updated {}", script.updated_at.to_rfc3339());
            println!();
            for node in &graph.nodes {
                let targets: Vec<String> = node
                    .connected_to
                    .iter()
                    .map(|t| match &t.output_type {
                        Some(tag) => format!("{} [{}]", t.to, tag),
                        None => t.to.clone(),
                    })
                    .collect();
                let name = node.display_name().unwrap_or_default();
                println!(
                    "  {:<12} {:<18} {:<16} -> {}",
                    node.id,
                    node.node_type,
                    name,
                    if targets.is_empty() { "-".to_string() } else { targets.join(", ") }
                );
            }
        }
        ScriptAction::Delete { script } => {
            let script = require_script(repo, &script)?;
            repo.delete_script(script.id)?;
            println!("Deleted script '{}'", script.name);
        }
    }
    Ok(())
}

async fn run_script(
    repo: &GraphRepository,
    config: &AppConfig,
    script: &Script,
    only: Option<Vec<String>>,
    execution_id: ExecutionId,
    parallel: bool,
) -> anyhow::Result<RunReport> {
    let registry = Arc::new(default_registry(&config.handlers));
    let stored = repo.load_nodes(script.id, &*registry)?;

    let nodes: Vec<RunNode> = match only {
        Some(ids) => ids
            .iter()
            .map(|id| {
                stored
                    .iter()
                    .find(|n| n.id == *id)
                    .map(RunNode::from)
                    .ok_or_else(|| anyhow!("node '{}' is not in script '{}'", id, script.name))
            })
            .collect::<anyhow::Result<_>>()?,
        None => stored.iter().map(RunNode::from).collect(),
    };
    if nodes.is_empty() {
        warn!(script = %script.name, "Script has no runnable nodes");
    }

    let sink = BestEffortSink::new(Arc::new(repo.execution_log()), config.log_sink.clone());
    let driver = RunDriver::new(registry).with_log_sink(sink);
    let request = RunRequest::new(nodes)
        .with_execution_id(execution_id.clone())
        .with_script_id(script.id)
        .with_parallel(parallel);

    let report = run_with_repeat(&driver, request).await;

    let released = driver.resources().release(&execution_id);
    if released > 0 {
        info!(execution_id = %execution_id, released, "Released run resources");
    }

    Ok(report?)
}

fn print_report(report: &RunReport) {
    println!("Execution {}", report.execution_id);
    for step in &report.results {
        let label = step.node_name.as_deref().unwrap_or(&step.node_id);
        match &step.result.error {
            None => println!(
                "  [OK] {:<20} {:<18} {}ms",
                label, step.node_type, step.duration_ms
            ),
            Some(err) => println!(
                "  [!!] {:<20} {:<18} {}: {}",
                label,
                step.node_type,
                err.reason,
                truncate(&err.message, 120)
            ),
        }
    }
    let failed = report.failed_nodes().len();
    println!();
    println!(
        "  {} nodes run, {} failed",
        report.results.len(),
        failed
    );
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
