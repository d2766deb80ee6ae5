// ABOUTME: Entry point for the switchyard binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs the controller or one specialist on tasks.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;

use switchyard_agent::{
    Agent, AgentDeps, AgentError, AutoApprove, AutoDeny, BackendFactory, CancelHandle,
    ConfirmationChannel, ConfirmationGate, Controller, EnvBackendFactory, Roster, RunOutcome,
    SessionOptions, SharedInput, SwitchyardConfig, TerminalPrompt, builtin_registry,
    controller::CONTROLLER_NAME, create_backend,
};
use switchyard_core::SessionKey;
use switchyard_store::{FileSessionStore, SessionStore};

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Route tasks to tool-using specialist agents")]
struct Cli {
    /// Task to run once; without it, tasks are read from stdin.
    task: Option<String>,

    /// Session identifier; omitted sessions share one record per agent.
    #[arg(long)]
    session: Option<String>,

    /// Run this specialist directly instead of the controller.
    #[arg(long)]
    agent: Option<String>,

    /// Working directory for the session.
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Approve every high-risk tool call without asking.
    #[arg(long, conflicts_with = "no_confirm_deny")]
    yes: bool,

    /// Deny every high-risk tool call without asking.
    #[arg(long)]
    no_confirm_deny: bool,

    /// Delete the persisted state for the selected session and exit.
    #[arg(long)]
    reset: bool,

    /// List the persisted session records and exit.
    #[arg(long, conflicts_with = "reset")]
    list_sessions: bool,

    /// Log filter, e.g. `debug` or `switchyard_agent=trace`.
    #[arg(long)]
    log: Option<String>,
}

/// Whatever answers tasks in this process.
enum Runner {
    Controller(Box<Controller>),
    Specialist(Box<Agent>),
}

impl Runner {
    async fn run(&mut self, task: &str) -> Result<RunOutcome, AgentError> {
        match self {
            Runner::Controller(controller) => controller.run(task).await,
            Runner::Specialist(agent) => agent.run(task).await,
        }
    }

    fn cancel_handle(&self) -> CancelHandle {
        match self {
            Runner::Controller(controller) => controller.cancel_handle(),
            Runner::Specialist(agent) => agent.cancel_handle(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "switchyard failed");
            eprintln!("[Error: {:#}]", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(level),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("switchyard=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = SwitchyardConfig::from_env()?;
    let file_store = Arc::new(FileSessionStore::new(&config.state_dir));
    if cli.list_sessions {
        return list_sessions(&file_store).await;
    }
    let store: Arc<dyn SessionStore> = file_store;

    let registry = Arc::new(builtin_registry(&config)?);
    let roster = match &config.agents_file {
        Some(path) => Roster::load(path)?,
        None => Roster::builtin(),
    };
    roster.check_tools(&registry)?;

    if cli.reset {
        return reset(store.as_ref(), &roster, &cli).await;
    }

    let input = SharedInput::stdin();
    let channel: Arc<dyn ConfirmationChannel> = if cli.yes {
        Arc::new(AutoApprove)
    } else if cli.no_confirm_deny {
        Arc::new(AutoDeny)
    } else {
        Arc::new(TerminalPrompt::new(input.clone()))
    };
    let mut gate = ConfirmationGate::new(config.high_risk_tools.clone(), channel);
    if let Some(limit) = config.confirm_timeout {
        gate = gate.with_timeout(limit);
    }
    let gate = Arc::new(gate);
    let deps = AgentDeps::new(registry, gate)
        .with_store(Arc::clone(&store))
        .with_limits(config.run_limits());

    let backends = Arc::new(EnvBackendFactory::new(
        config.provider.clone(),
        config.model.clone(),
    ));
    let session = SessionOptions {
        session_id: cli.session.clone(),
        working_dir: cli.workdir.clone(),
    };

    let mut runner = match &cli.agent {
        Some(name) => {
            let def = roster.get(name).with_context(|| {
                format!(
                    "Specialist agent '{}' not found. Please choose one of: {}",
                    name,
                    roster.names().join(", ")
                )
            })?;
            let backend = backends.backend_for(def)?;
            let mut agent = Agent::new(def.agent_spec(), backend, deps, cli.session.as_deref());
            if let Some(dir) = &cli.workdir {
                agent.set_working_dir(dir.clone());
            }
            Runner::Specialist(Box::new(agent))
        }
        None => {
            let backend = create_backend(&config.provider, config.model.as_deref())?;
            let controller = Controller::new(roster, backend, backends, deps, session)?;
            Runner::Controller(Box::new(controller))
        }
    };

    let running = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(runner.cancel_handle(), Arc::clone(&running));

    match &cli.task {
        Some(task) => Ok(answer(&mut runner, &running, task).await),
        None => interactive(&mut runner, &running, &input).await,
    }
}

/// A Ctrl-C during a run cancels it at its next round boundary. A second
/// one, or one while no run is active, ends the process.
fn spawn_interrupt_watcher(handle: CancelHandle, running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !running.swap(false, Ordering::SeqCst) {
                eprintln!();
                std::process::exit(130);
            }
            tracing::info!("interrupt received, cancelling current run (Ctrl-C again to quit)");
            handle.cancel();
        }
    });
}

async fn answer(runner: &mut Runner, running: &AtomicBool, task: &str) -> ExitCode {
    runner.cancel_handle().clear();
    running.store(true, Ordering::SeqCst);
    let result = runner.run(task).await;
    running.store(false, Ordering::SeqCst);

    match result {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                eprintln!("warning: {}", warning);
            }
            println!("{}", outcome.text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            println!("{}", e.tagged());
            ExitCode::FAILURE
        }
    }
}

async fn interactive(
    runner: &mut Runner,
    running: &AtomicBool,
    input: &SharedInput,
) -> anyhow::Result<ExitCode> {
    let mut last = ExitCode::SUCCESS;
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "exit" || task == "quit" {
            break;
        }
        last = answer(runner, running, task).await;
    }
    Ok(last)
}

async fn list_sessions(store: &FileSessionStore) -> anyhow::Result<ExitCode> {
    let keys = store.list_keys().await?;
    if keys.is_empty() {
        println!("No saved sessions in {}", store.dir().display());
    }
    for key in keys {
        println!("{}", key);
    }
    Ok(ExitCode::SUCCESS)
}

async fn reset(store: &dyn SessionStore, roster: &Roster, cli: &Cli) -> anyhow::Result<ExitCode> {
    let session = cli.session.as_deref();
    let names: Vec<&str> = match &cli.agent {
        Some(name) => vec![name.as_str()],
        None => std::iter::once(CONTROLLER_NAME)
            .chain(roster.names())
            .collect(),
    };
    for name in names {
        let key = SessionKey::new(session, name);
        if store.delete(&key).await? {
            println!("Reset {}", key);
        }
    }
    Ok(ExitCode::SUCCESS)
}
