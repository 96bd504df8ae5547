use std::error::Error;
use std::io::{self, Write};

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use context_gating::{ContextState, ProcessOption, Scope, needs_task_selection, resolve_mode};
use qa_client::catalog::{fetch_processes, fetch_roles, fetch_tasks};
use qa_client::chat_store::{ChatStore, InMemoryChatStore};
use qa_client::confidence::BadgeColor;
use qa_client::{
    QaClient, StreamAbortHandle, StreamCallbacks, StreamProgress, run_turn_with, telemetry,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "process-qa")]
#[command(about = "Ask questions about business processes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging for the client library
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Ask(AskArgs),
    /// Check whether the backend is reachable
    Health,
    /// List selectable processes
    Processes,
    /// List the steps of a modeled process
    Tasks { process_id: String },
    /// List the roles (lanes) of a modeled process
    Roles { process_id: String },
}

#[derive(Args)]
struct AskArgs {
    /// The question
    query: String,

    /// Process id or name
    #[arg(short, long)]
    process: Option<String>,

    /// How much of the process structure to use
    #[arg(short, long, value_enum, default_value_t = ScopeArg::Docs)]
    scope: ScopeArg,

    /// Step id or name (implies --scope step)
    #[arg(short, long)]
    task: Option<String>,

    /// Role (lane) id or name
    #[arg(short, long)]
    role: Option<String>,

    /// Retrieval depth
    #[arg(long)]
    top_k: Option<u32>,

    /// Print the retrieved sources after the answer
    #[arg(long)]
    sources: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Docs,
    Overview,
    Step,
}

impl From<ScopeArg> for Scope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Docs => Scope::Docs,
            ScopeArg::Overview => Scope::Overview,
            ScopeArg::Step => Scope::Step,
        }
    }
}

/// Prints tokens as they arrive; status changes go to stderr.
struct TerminalPrinter {
    verbose: bool,
}

impl StreamCallbacks for TerminalPrinter {
    fn on_token(&mut self, token: &str) {
        print!("{token}");
        let _ = io::stdout().flush();
    }

    fn on_progress(&mut self, progress: StreamProgress) {
        if self.verbose {
            eprintln!(
                "{}",
                format!(
                    "[{}] {} tokens, {} ms",
                    progress.status, progress.token_count, progress.elapsed_ms
                )
                .dimmed()
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // .env is optional for the CLI
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(telemetry::env_filter(cli.verbose)?)
        .with(telemetry::layer(cli.verbose))
        .init();

    let client = QaClient::from_env()?;

    match cli.command {
        Commands::Health => {
            let status = client.health().await;
            if status.ok {
                println!("{} {} ({} ms)", "UP".green().bold(), status.endpoint, status.latency_ms);
            } else {
                println!("{} {}: {}", "DOWN".red().bold(), status.endpoint, status.message);
                std::process::exit(1);
            }
        }
        Commands::Processes => {
            for p in fetch_processes(&client).await? {
                let kind = if p.has_model { "model".cyan() } else { "docs".normal() };
                let docs = p.doc_count.map(|n| format!(" ({n} docs)")).unwrap_or_default();
                println!("{:<40} {:<6} {}{}", p.id, kind, p.name, docs);
            }
        }
        Commands::Tasks { process_id } => {
            for t in fetch_tasks(&client, &process_id).await {
                println!("{:<40} {}", t.task_id, t.task_name);
            }
        }
        Commands::Roles { process_id } => {
            for r in fetch_roles(&client, &process_id).await {
                println!("{:<40} {}", r.id, r.name);
            }
        }
        Commands::Ask(args) => ask(&client, args, cli.verbose).await?,
    }

    Ok(())
}

async fn ask(client: &QaClient, args: AskArgs, verbose: bool) -> Result<(), Box<dyn Error>> {
    let ctx = build_context(client, &args).await?;
    if needs_task_selection(&ctx) {
        eprintln!("{}", "Step scope without a step; answering with process context.".yellow());
    }
    if verbose {
        eprintln!("{}", format!("gating mode: {}", resolve_mode(&ctx)).dimmed());
    }

    let mut options = client.config().ask_options();
    if args.top_k.is_some() {
        options.top_k = args.top_k;
    }

    let mut store = InMemoryChatStore::new();
    let chat = store.create_chat(None);
    let mut printer = TerminalPrinter { verbose };
    let abort = StreamAbortHandle::new();

    let ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.abort();
        }
    });

    match run_turn_with(
        client,
        &mut store,
        &chat.id,
        &args.query,
        &ctx,
        options,
        &abort,
        &mut printer,
    )
    .await
    {
        Ok(outcome) => {
            println!();
            let badge = format!(
                "confidence: {} ({:.2})",
                outcome.confidence.label, outcome.confidence.score
            );
            let badge = match outcome.confidence.color {
                BadgeColor::Green => badge.green(),
                BadgeColor::Amber => badge.yellow(),
                BadgeColor::Red => badge.red(),
            };
            println!("{badge}");
            if args.sources {
                for chunk in &outcome.message.evidence {
                    let preview: String = chunk.text.chars().take(100).collect();
                    println!("  {} {}", chunk.chunk_id.dimmed(), preview.replace('\n', " "));
                }
            }
            Ok(())
        }
        Err(err) => {
            println!();
            eprintln!("{}", err.user_message().red());
            if err.retryable() {
                eprintln!("{}", "The request can be retried.".yellow());
            }
            Err(err.into())
        }
    }
}

/// Resolves `--process/--role/--task` against the catalog and applies them in
/// selection order.
async fn build_context(client: &QaClient, args: &AskArgs) -> Result<ContextState, Box<dyn Error>> {
    let mut ctx = ContextState::new();
    let Some(wanted) = args.process.as_deref() else {
        return Ok(ctx);
    };

    let processes = fetch_processes(client).await?;
    let process = find_process(&processes, wanted)
        .ok_or_else(|| format!("unknown process: {wanted}"))?
        .clone();
    let process_id = process.id.clone();
    ctx.set_process(Some(process));

    let scope = if args.task.is_some() { Scope::Step } else { args.scope.into() };
    ctx.set_scope(scope);

    if let Some(wanted) = args.role.as_deref() {
        let role = fetch_roles(client, &process_id)
            .await
            .into_iter()
            .find(|r| r.id == wanted || r.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown role: {wanted}"))?;
        ctx.set_role(Some(role));
    }

    if let Some(wanted) = args.task.as_deref() {
        let task = fetch_tasks(client, &process_id)
            .await
            .into_iter()
            .find(|t| t.task_id == wanted || t.task_name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown task: {wanted}"))?;
        ctx.set_task(Some(task));
    }

    Ok(ctx)
}

fn find_process<'a>(processes: &'a [ProcessOption], wanted: &str) -> Option<&'a ProcessOption> {
    processes
        .iter()
        .find(|p| p.id == wanted)
        .or_else(|| processes.iter().find(|p| p.name.eq_ignore_ascii_case(wanted)))
}
