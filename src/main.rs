use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weave_core::config::AppConfig;
use weave_core::event::{EngineEvent, EventBus};
use weave_core::types::{PlanContext, TaskStatus};
use weave_engine::{CollaborationResponse, Orchestrator, PlanRequest};
use weave_gateway::GatewayServer;
use weave_services::HttpServiceClient;

#[derive(Parser)]
#[command(name = "weave", version, about = "Collaboration engine for capability-tagged AI services")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "weave.toml", env = "WEAVE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway and the service prober
    Serve,
    /// Plan and execute a prompt, printing progress
    Run {
        #[command(flatten)]
        plan: PlanArgs,
        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Decompose a prompt into a plan without executing it
    Plan {
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// List workflow templates
    Templates,
    /// Show one workflow template
    Template {
        /// Template name
        name: String,
    },
    /// Suggest a template for a prompt
    Suggest {
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Probe every configured service and show its status
    Services,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Workflow template to instantiate (auto-detected when omitted)
    #[arg(short, long)]
    template: Option<String>,
    /// Abort the remaining plan on the first failure
    #[arg(long)]
    strict: bool,
    /// Preferred service, may be repeated
    #[arg(long = "prefer")]
    preferences: Vec<String>,
    /// Excluded service, may be repeated
    #[arg(long = "exclude")]
    exclusions: Vec<String>,
    /// Maximum tasks in flight per wave
    #[arg(long)]
    max_concurrency: Option<usize>,
    /// Per-task timeout in seconds
    #[arg(long)]
    task_timeout: Option<u64>,
    /// Deadline for the whole plan in seconds
    #[arg(long)]
    deadline: Option<u64>,
    /// The prompt (read from stdin when empty)
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

impl PlanArgs {
    fn into_request(self) -> PlanRequest {
        let context = PlanContext {
            preferences: self.preferences,
            exclusions: self.exclusions,
            parallel_execution: !self.strict,
            max_concurrency: self.max_concurrency,
            task_timeout_secs: self.task_timeout,
            deadline_secs: self.deadline,
            ..PlanContext::default()
        };
        let mut request = PlanRequest::new(read_prompt(self.prompt)).with_context(context);
        request.template = self.template;
        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weave=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "weave", &mut io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "No config file found, using defaults");
        AppConfig::default()
    };

    let event_bus = Arc::new(EventBus::default());
    let client = Arc::new(HttpServiceClient::new(&config.registry)?);
    let orchestrator = Arc::new(Orchestrator::from_config(&config, client, event_bus.clone())?);

    match cli.command {
        Commands::Completions { .. } => {}
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Serve => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            let cancel = CancellationToken::new();

            let prober = {
                let registry = orchestrator.registry().clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { registry.run(cancel).await })
            };

            // Graceful shutdown on Ctrl-C
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            info!(
                bind = %gateway_config.bind,
                services = config.services.len(),
                "Starting gateway"
            );
            let server = GatewayServer::new(gateway_config, orchestrator);
            let result = server.run(cancel.clone()).await;
            cancel.cancel();
            prober.await.ok();
            result?;
        }
        Commands::Run { plan, json } => {
            orchestrator.registry().probe_all().await;
            let printer = spawn_progress_printer(&event_bus);
            let response = orchestrator.collaborate(plan.into_request()).await?;
            printer.abort();
            if json {
                println!("{}", serde_json::to_string_pretty(response.as_ref())?);
            } else {
                print_response(&response);
            }
        }
        Commands::Plan { plan } => {
            orchestrator.registry().probe_all().await;
            let summary = orchestrator.create_plan(plan.into_request())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Templates => {
            let listing = orchestrator.templates();
            for (name, description) in &listing.templates {
                println!("{:<22} {}", name, description);
            }
            eprintln!("{} templates", listing.count);
        }
        Commands::Template { name } => {
            let detail = orchestrator.template(&name)?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Commands::Suggest { prompt } => {
            let suggestion = orchestrator.suggest(&read_prompt(prompt))?;
            println!("{}", serde_json::to_string_pretty(&suggestion)?);
        }
        Commands::Services => {
            let snapshot = orchestrator.registry().probe_all().await;
            if snapshot.is_empty() {
                eprintln!("No services configured. Add [[services]] entries to the config.");
            }
            for svc in snapshot.iter() {
                let caps: Vec<&str> = svc.capabilities.iter().map(String::as_str).collect();
                println!(
                    "{:<20} {:<8} p{:<3} {:<40} {}",
                    svc.name,
                    svc.status,
                    svc.priority,
                    svc.endpoint,
                    caps.join(",")
                );
            }
        }
    }

    Ok(())
}

fn read_prompt(words: Vec<String>) -> String {
    let text = words.join(" ");
    if !text.is_empty() {
        return text;
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

fn spawn_progress_printer(event_bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                EngineEvent::PlanCreated { template, tasks, .. } => {
                    eprintln!("[plan] template {} with {} tasks", template, tasks);
                }
                EngineEvent::WaveStarted { wave, task_ids, .. } => {
                    eprintln!("[wave {}] {}", wave, task_ids.join(", "));
                }
                EngineEvent::TaskStarted { task_id, service, .. } => {
                    eprintln!("  [{}] -> {}", task_id, service);
                }
                EngineEvent::TaskRetrying {
                    task_id,
                    attempt,
                    backoff_ms,
                    error,
                    ..
                } => {
                    eprintln!(
                        "  [{}] retry {} in {}ms: {}",
                        task_id,
                        attempt,
                        backoff_ms,
                        truncate(&error, 120)
                    );
                }
                EngineEvent::TaskFinished { task_id, status, .. } => {
                    let mark = match status {
                        TaskStatus::Succeeded => "ok",
                        TaskStatus::Failed => "FAILED",
                        _ => "skipped",
                    };
                    eprintln!("  [{}: {}]", task_id, mark);
                }
                EngineEvent::PlanFinished { status, elapsed_ms, .. } => {
                    eprintln!("[done] {} in {}ms", status, elapsed_ms);
                }
                EngineEvent::ServiceStatusChanged { .. } => {}
            }
        }
    })
}

fn print_response(response: &CollaborationResponse) {
    println!("{}", response.summary);
    for (task_id, outcome) in &response.results {
        println!("\n== {} ({}) ==", task_id, outcome.status);
        if let Some(content) = &outcome.content {
            println!("{}", content);
        }
        if let Some(error) = &outcome.error {
            println!("{}: {}", error.code, error.message);
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
