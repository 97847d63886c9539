use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weave_core::catalog::AgentCatalog;
use weave_core::config::{AppConfig, PlannerConfig};
use weave_core::event::EventBus;
use weave_core::traits::{AuditSink, LlmClient, NullAuditSink};
use weave_core::types::EngineEvent;

use weave_agent::{
    OrchestratorBuilder, PlanExecutor, PlanGraph, RunLogger, StepDispatcher, TurnOrchestrator,
};
use weave_memory::SqliteStore;
use weave_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "weave", version, about = "Plan-and-execute agent orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weave.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL mode
    Repl,
    /// Run a single request and exit
    Run {
        /// The request to plan and execute
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Validate and execute a plan file directly, printing every step result
    Exec {
        /// Path to a `{"steps": [...]}` JSON file
        plan: PathBuf,
        /// Text stored under `initial_request`
        #[arg(long, default_value = "")]
        request: String,
        /// Do not record step outputs in the database
        #[arg(long)]
        no_persist: bool,
    },
    /// List the agents and tools the planner can use
    Catalog,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Everything a command needs, built once from the config.
struct Runtime {
    config: AppConfig,
    catalog: Arc<AgentCatalog>,
    tools: Arc<ToolRegistry>,
    store: Arc<SqliteStore>,
    llm: Arc<dyn LlmClient>,
    event_bus: Arc<EventBus>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weave=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "weave", &mut io::stdout());
        return Ok(());
    }

    let (config, base) = load_config(&cli.config)?;
    let runtime = build_runtime(config, &base)?;

    let shutdown = CancellationToken::new();
    let logger = match &runtime.config.log {
        Some(log_config) if log_config.enabled => {
            let log_dir = resolve(&base, &log_config.log_dir);
            let handle = RunLogger::new(log_dir, log_config.level)
                .start(&runtime.event_bus, shutdown.clone());
            info!("RunLogger started (level {})", log_config.level);
            Some(handle)
        }
        _ => None,
    };

    let result = match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&runtime.config)?);
            Ok(())
        }
        Some(Commands::Catalog) => {
            print_catalog(&runtime);
            Ok(())
        }
        Some(Commands::Exec {
            plan,
            request,
            no_persist,
        }) => exec_plan(&runtime, &plan, &request, no_persist).await,
        Some(Commands::Run { prompt }) => {
            let input = prompt.join(" ");
            if input.trim().is_empty() {
                anyhow::bail!("No request given. Usage: weave run <request>");
            }
            let mut orchestrator = orchestrator(&runtime);
            run_once(&mut orchestrator, &runtime.event_bus, &input).await
        }
        Some(Commands::Repl) | None => {
            let mut orchestrator = orchestrator(&runtime);
            run_repl(&mut orchestrator, &runtime).await
        }
        Some(Commands::Completions { .. }) => Ok(()),
    };

    shutdown.cancel();
    if let Some(handle) = logger {
        handle.await.ok();
    }
    result
}

/// Load the config file, falling back to `~/.weave/config.toml` and then
/// to environment variables. Returns the config and the directory relative
/// paths resolve against.
fn load_config(path: &Path) -> anyhow::Result<(AppConfig, PathBuf)> {
    if path.exists() {
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        return Ok((AppConfig::load(path)?, base));
    }

    if let Some(home) = dirs_home().map(|h| h.join(".weave")) {
        let home_config = home.join("config.toml");
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok((AppConfig::load(&home_config)?, home));
        }
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create weave.toml");
    Ok((create_env_config(), PathBuf::from(".")))
}

/// Minimal config from `WEAVE_MODEL`, `OPENAI_API_KEY` and `WEAVE_BASE_URL`.
fn create_env_config() -> AppConfig {
    let model = std::env::var("WEAVE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let mut config = AppConfig::with_planner(PlannerConfig::new(model));
    config.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
    config.llm.base_url = std::env::var("WEAVE_BASE_URL").ok();
    config
}

fn build_runtime(config: AppConfig, base: &Path) -> anyhow::Result<Runtime> {
    let mut catalog = AgentCatalog::load_dir(&config.agents_dir_in(base))?;
    catalog.merge(AgentCatalog::from_specs(config.agents.clone()));
    if catalog.orchestrator().is_none() {
        warn!("No orchestrator_agent in the catalog, using the default planner prompt");
    }

    let store = Arc::new(SqliteStore::open(&config.db_path_in(base))?);
    let llm: Arc<dyn LlmClient> = Arc::from(weave_llm::create_client(&config.llm));

    Ok(Runtime {
        config,
        catalog: Arc::new(catalog),
        tools: Arc::new(ToolRegistry::with_builtins()),
        store,
        llm,
        event_bus: Arc::new(EventBus::default()),
    })
}

fn orchestrator(runtime: &Runtime) -> TurnOrchestrator {
    TurnOrchestrator::new(OrchestratorBuilder {
        config: runtime.config.clone(),
        llm: runtime.llm.clone(),
        catalog: runtime.catalog.clone(),
        tools: runtime.tools.clone(),
        audit: runtime.store.clone(),
        event_bus: runtime.event_bus.clone(),
    })
}

fn print_catalog(runtime: &Runtime) {
    println!("Agents:");
    for agent in runtime.catalog.callable() {
        let model = agent.model.as_deref().unwrap_or("default");
        println!(
            "  {} ({}) params={:?} {}",
            agent.name, model, agent.expected_params, agent.description
        );
    }
    println!("Tools:");
    for tool in runtime.tools.definitions() {
        println!(
            "  {} params={:?} {}",
            tool.name,
            tool.param_names(),
            tool.description
        );
    }
}

/// Cancel `token` on Ctrl-C. Abort the returned handle once the work is done.
fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    })
}

/// Print step progress to stderr while a turn runs.
fn spawn_progress_printer(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                EngineEvent::PlannerRetry { attempt, error } => {
                    eprintln!("[planner attempt {} failed] {}", attempt, truncate(&error, 200));
                }
                EngineEvent::StepStarted { kind, name, .. } => {
                    eprintln!("[{}: {}]", kind.as_str(), name);
                }
                EngineEvent::StepFinished {
                    name,
                    succeeded,
                    elapsed_ms,
                    ..
                } => {
                    let status = if succeeded { "ok" } else { "ERROR" };
                    eprintln!("[{}: {}] {}ms", name, status, elapsed_ms);
                }
                EngineEvent::TurnComplete { .. } | EngineEvent::TurnFailed { .. } => break,
                _ => {}
            }
        }
    })
}

async fn run_once(
    orchestrator: &mut TurnOrchestrator,
    event_bus: &EventBus,
    input: &str,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let signal = cancel_on_ctrl_c(cancel.clone());
    let printer = spawn_progress_printer(event_bus);

    let result = orchestrator.run_turn(input, &cancel).await;
    signal.abort();
    printer.await.ok();

    let outcome = result?;
    println!("\nAssistant: {}", outcome.response);
    Ok(())
}

async fn run_repl(orchestrator: &mut TurnOrchestrator, runtime: &Runtime) -> anyhow::Result<()> {
    println!("Weave v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Planner: {} | {} agent(s), {} tool(s)",
        runtime.config.planner.model,
        runtime.catalog.callable().count(),
        runtime.tools.list().len()
    );
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                println!("/history  show this conversation's turns");
                println!("/clear    forget this conversation's turns");
                println!("/catalog  list agents and tools");
                println!("/quit     exit");
                continue;
            }
            "/clear" => {
                orchestrator.clear_history();
                println!("History cleared. (Messages persist in the database)");
                continue;
            }
            "/history" => {
                for (i, turn) in orchestrator.history().turns().iter().enumerate() {
                    println!("{}. {} -> {}", i + 1, turn.user_input, truncate(&turn.response, 120));
                }
                continue;
            }
            "/catalog" => {
                print_catalog(runtime);
                continue;
            }
            _ => {}
        }

        if let Err(e) = run_once(orchestrator, &runtime.event_bus, input).await {
            eprintln!("Error: {}", e);
        }
        println!();
    }

    Ok(())
}

/// Execute a plan file without the planner.
async fn exec_plan(
    runtime: &Runtime,
    path: &Path,
    request: &str,
    no_persist: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)?;
    let graph = PlanGraph::from_json(&text)?;

    let audit: Arc<dyn AuditSink> = if no_persist {
        Arc::new(NullAuditSink)
    } else {
        runtime.store.clone()
    };
    let dispatcher = StepDispatcher::new(
        runtime.catalog.clone(),
        runtime.llm.clone(),
        runtime.tools.clone(),
        audit,
        runtime.config.planner.model.clone(),
    );
    let executor = PlanExecutor::new(Arc::new(dispatcher), runtime.config.engine.max_concurrency)
        .with_event_bus(runtime.event_bus.clone());

    let cancel = CancellationToken::new();
    let signal = cancel_on_ctrl_c(cancel.clone());
    let result = executor.execute(&graph, request, &cancel).await;
    signal.abort();

    let report = result?;
    for (i, set) in report.ready_sets.iter().enumerate() {
        eprintln!("[set {}] {}", i, set.join(", "));
    }
    println!("{}", serde_json::to_string_pretty(&report.results.to_json())?);
    Ok(())
}

fn resolve(base: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
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
