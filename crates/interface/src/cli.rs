//! CLI - Command Line Interface
//!
//! Available Commands:
//! - nodemesh scenario run <file|id>       - Run a scenario once
//! - nodemesh scenario validate <file>     - Parse and check a scenario document
//! - nodemesh scenario install <id>        - Add a scenario to a workspace index
//! - nodemesh scenario list                - List available or installed scenarios
//! - nodemesh nodes list|register|heartbeat|find-skill
//! - nodemesh notify "text"                - Route one notification

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{Level, debug, info};

use nodemesh_core::{CapabilitySet, Event, NodeConfig, NodeInfo, ScenarioModel, UI_NOTIFY};
use nodemesh_runtime::scenario::repository::load_file;
use nodemesh_runtime::{
    HttpSkillInvoker, LogVoice, MeshNode, RouteOutcome, ScenarioEngine, ScenarioRepository,
};

/// Default address of the local skill host
const DEFAULT_SKILLS_URL: &str = "http://127.0.0.1:8777";

/// CLI Errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Node initialization failed: {0}")]
    NodeInit(String),

    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
}

/// nodemesh CLI
#[derive(Parser, Debug)]
#[command(name = "nodemesh")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Config file (defaults to <base_dir>/node.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base directory override
    #[arg(short, long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Scenario commands
    #[command(subcommand)]
    Scenario(ScenarioCommand),

    /// Node directory commands
    #[command(subcommand)]
    Nodes(NodesCommand),

    /// Route one ui.notify event through the router
    Notify(NotifyArgs),
}

#[derive(Subcommand, Debug)]
pub(crate) enum ScenarioCommand {
    /// Run a scenario from a file or by id
    Run(ScenarioRunArgs),

    /// Parse a scenario file and check its call targets
    Validate {
        file: PathBuf,
    },

    /// Record a scenario in a workspace install index
    Install {
        id: String,
        #[arg(short, long, default_value = "default")]
        workspace: String,
    },

    /// List scenarios; installed ones when a workspace is given
    List {
        #[arg(short, long)]
        workspace: Option<String>,
    },
}

#[derive(Args, Debug)]
pub(crate) struct ScenarioRunArgs {
    /// Scenario file path or id under <base_dir>/scenarios
    pub target: String,

    /// Skill host base URL
    #[arg(long)]
    pub skills_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum NodesCommand {
    /// List known nodes with their online status
    List,

    /// Register a node from a YAML or JSON file
    Register {
        file: PathBuf,
    },

    /// Record a heartbeat for a node
    Heartbeat {
        node_id: String,

        /// Replace skills with this list
        #[arg(long, value_delimiter = ',')]
        skills: Option<Vec<String>>,

        /// Replace I/O channels with this list
        #[arg(long, value_delimiter = ',')]
        io: Option<Vec<String>>,
    },

    /// Nodes exposing a skill
    FindSkill {
        skill: String,

        /// Include offline nodes
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args, Debug)]
pub(crate) struct NotifyArgs {
    pub text: String,

    /// Event source tag
    #[arg(long, default_value = "cli")]
    pub source: String,
}

/// Parse CLI arguments and execute commands
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli).await
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

pub(crate) async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = load_config(cli.config.as_deref(), cli.base_dir.clone())?;
    let output = cli.output.unwrap_or_default();
    debug!(node_id = %config.node_id, base_dir = %config.base_dir.display(), "config loaded");

    match cli.command {
        Commands::Scenario(cmd) => cmd_scenario(cmd, config, output).await,
        Commands::Nodes(cmd) => cmd_nodes(cmd, config, output).await,
        Commands::Notify(args) => cmd_notify(args, config).await,
    }
}

pub(crate) fn load_config(path: Option<&Path>, base_dir: Option<PathBuf>) -> Result<NodeConfig, CliError> {
    // An overridden base dir also moves the default config file
    let default_file = base_dir
        .as_ref()
        .map(|dir| dir.join("node.yaml"))
        .filter(|file| file.exists());
    let path = path.or(default_file.as_deref());
    let mut config = NodeConfig::load(path).map_err(|e| CliError::Config(e.to_string()))?;
    if let Some(base_dir) = base_dir {
        config.base_dir = base_dir;
    }
    Ok(config)
}

async fn open_node(config: NodeConfig) -> Result<MeshNode, CliError> {
    MeshNode::open(config)
        .await
        .map_err(|e| CliError::NodeInit(e.to_string()))
}

fn print_output<T: Serialize>(value: &T, output: OutputFormat) -> Result<(), CliError> {
    let text = match output {
        OutputFormat::Pretty => serde_yaml::to_string(value).map_err(|e| CliError::InvalidInput(e.to_string()))?,
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| CliError::InvalidInput(e.to_string()))?
        }
    };
    println!("{}", text.trim_end());
    Ok(())
}

// ===== scenario =====

async fn cmd_scenario(cmd: ScenarioCommand, config: NodeConfig, output: OutputFormat) -> Result<(), CliError> {
    match cmd {
        ScenarioCommand::Run(args) => cmd_scenario_run(args, config, output).await,
        ScenarioCommand::Validate { file } => cmd_scenario_validate(&file),
        ScenarioCommand::Install { id, workspace } => {
            let node = open_node(config).await?;
            let engine = ScenarioEngine::new();
            let row = node
                .scenario_service(engine)
                .install(&id, &workspace)
                .await
                .map_err(|e| CliError::Scenario(e.to_string()))?;
            print_output(&row, output)
        }
        ScenarioCommand::List { workspace } => match workspace {
            Some(workspace) => {
                let node = open_node(config).await?;
                let rows = node
                    .scenario_service(ScenarioEngine::new())
                    .list_installed(&workspace)
                    .await
                    .map_err(|e| CliError::Scenario(e.to_string()))?;
                print_output(&rows, output)
            }
            None => {
                let ids = ScenarioRepository::new(config.scenarios_dir())
                    .list()
                    .map_err(|e| CliError::Scenario(e.to_string()))?;
                print_output(&ids, output)
            }
        },
    }
}

/// A path to an existing file, or an id under the scenarios directory
pub(crate) fn resolve_scenario(target: &str, config: &NodeConfig) -> Result<ScenarioModel, CliError> {
    let path = Path::new(target);
    let model = if path.is_file() {
        load_file(path, None)
    } else {
        ScenarioRepository::new(config.scenarios_dir()).load(target)
    };
    model.map_err(|e| CliError::Scenario(e.to_string()))
}

pub(crate) fn cmd_scenario_validate(file: &Path) -> Result<(), CliError> {
    let model = load_file(file, None).map_err(|e| CliError::Scenario(e.to_string()))?;

    // Targets only, the invoker is never called
    let engine = ScenarioEngine::standard(
        Arc::new(nodemesh_runtime::FnSkillInvoker::new(|_, _, _| {
            Ok(serde_json::Value::Null)
        })),
        Arc::new(nodemesh_runtime::EventBus::new()),
        Arc::new(nodemesh_runtime::StdoutConsole),
        Arc::new(LogVoice),
        "validate",
    );
    engine
        .validate(&model)
        .map_err(|e| CliError::Scenario(e.to_string()))?;

    println!(
        "{} {} ok: {} steps, skills: [{}]",
        model.id,
        model.version,
        model.steps.len(),
        model.skill_dependencies().join(", ")
    );
    Ok(())
}

async fn cmd_scenario_run(args: ScenarioRunArgs, config: NodeConfig, output: OutputFormat) -> Result<(), CliError> {
    let model = resolve_scenario(&args.target, &config)?;
    let skills_url = args
        .skills_url
        .or_else(|| config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_SKILLS_URL.to_string());
    let token = config.token.clone();
    let timeout = config.router.relay_timeout();

    let node = open_node(config).await?;
    if let Err(e) = node.router().reload_rules() {
        info!(error = %e, "routing rules unavailable, printing locally");
    }

    // Collect notifications so every one is routed before exiting
    let pending: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pending);
    let subscription = node.bus().subscribe(UI_NOTIFY, move |ev| {
        if let Ok(mut events) = sink.lock() {
            events.push(ev.clone());
        }
    });

    let bus = Arc::clone(node.bus());
    let console: Arc<dyn nodemesh_runtime::ConsoleSink> = Arc::new(nodemesh_runtime::StdoutConsole);
    let node_id = node.config().node_id.clone();

    // The HTTP invoker is blocking; keep the whole run off the async workers
    let result = tokio::task::spawn_blocking(move || {
        let invoker = HttpSkillInvoker::new(&skills_url, token, timeout)
            .map_err(|e| CliError::InvalidInput(e.to_string()))?;
        let engine = ScenarioEngine::standard(Arc::new(invoker), bus, console, Arc::new(LogVoice), node_id);
        engine.run(&model).map_err(|e| CliError::Scenario(e.to_string()))
    })
    .await
    .map_err(|e| CliError::Scenario(e.to_string()))??;

    node.bus().unsubscribe(subscription);
    let events = pending.lock().map(|e| e.clone()).unwrap_or_default();
    for event in &events {
        report_route(node.router().on_event(event).await);
    }

    print_output(&result, output)
}

// ===== nodes =====

async fn cmd_nodes(cmd: NodesCommand, config: NodeConfig, output: OutputFormat) -> Result<(), CliError> {
    let node = open_node(config).await?;
    let directory = node.directory();

    match cmd {
        NodesCommand::List => {
            let nodes = directory
                .list_known_nodes()
                .await
                .map_err(|e| CliError::Directory(e.to_string()))?;
            print_output(&nodes, output)
        }
        NodesCommand::Register { file } => {
            let info = read_node_info(&file)?;
            let record = directory
                .register(info)
                .await
                .map_err(|e| CliError::Directory(e.to_string()))?;
            print_output(&record, output)
        }
        NodesCommand::Heartbeat { node_id, skills, io } => {
            let capacity = match (skills, io) {
                (None, None) => None,
                (skills, io) => Some(CapabilitySet::new(io.unwrap_or_default(), skills.unwrap_or_default())),
            };
            let known = directory
                .heartbeat(&node_id, capacity)
                .await
                .map_err(|e| CliError::Directory(e.to_string()))?;
            if known {
                println!("{node_id}: online");
            } else {
                println!("{node_id}: not registered, marked online for this process only");
            }
            Ok(())
        }
        NodesCommand::FindSkill { skill, all } => {
            let nodes = directory
                .find_nodes_with_skill(&skill, !all)
                .await
                .map_err(|e| CliError::Directory(e.to_string()))?;
            print_output(&nodes, output)
        }
    }
}

pub(crate) fn read_node_info(file: &Path) -> Result<NodeInfo, CliError> {
    let content = std::fs::read_to_string(file)
        .map_err(|e| CliError::InvalidInput(format!("{}: {e}", file.display())))?;
    // YAML is a superset of JSON
    serde_yaml::from_str(&content).map_err(|e| CliError::InvalidInput(format!("{}: {e}", file.display())))
}

// ===== notify =====

async fn cmd_notify(args: NotifyArgs, config: NodeConfig) -> Result<(), CliError> {
    let node = open_node(config).await?;
    node.router()
        .reload_rules()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let event = Event::notify(args.text).with_source(args.source);
    report_route(node.router().on_event(&event).await);
    Ok(())
}

fn report_route(outcome: RouteOutcome) {
    match outcome {
        RouteOutcome::Ignored => info!("notification ignored: empty text"),
        RouteOutcome::Local => {}
        RouteOutcome::Relayed { node_id, base_url } => {
            info!(node = %node_id, base_url = %base_url, "notification relayed")
        }
        RouteOutcome::Unresolved { node_id } => {
            info!(node = %node_id, "notification dropped: target unreachable")
        }
        RouteOutcome::Failed { node_id, error } => {
            info!(node = %node_id, error = %error, "notification dropped: relay failed")
        }
    }
}
