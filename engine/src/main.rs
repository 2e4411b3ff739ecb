use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use colony_agents::{report_task, ContentAgent, MarketAgent, ReportKind, ResearchAgent, WhaleAgent};
use colony_channels::{Channel, ChannelMessage, HistoryStore, SendMessage, TelegramChannel};
use colony_core::{
    Config, Orchestrator, Scheduler, Supervisor, SupervisorConfig, ToolLoop,
};
use colony_dispatch::{Dispatcher, Endpoint, HttpJsonRpcEndpoint};
use colony_observability::init_logging;
use colony_providers::OpenAiChatModel;
use colony_skills::{default_catalog, default_skills};
use colony_state::StateStore;
use colony_types::{AlertSeverity, InboundMessage, ResponseStatus};

const EXIT_RUNTIME: i32 = 3;
const EXIT_RATE_LIMITED: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "colony-engine")]
#[command(about = "Headless Colony automation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway, agents and schedules until interrupted.
    Serve,
    /// Summarise the persisted state file.
    Status,
    /// Inspect or drive background agents.
    Agents {
        #[command(subcommand)]
        command: AgentsCommand,
    },
    /// Inspect the default report schedules.
    Schedules {
        #[command(subcommand)]
        command: SchedulesCommand,
    },
    /// Manage the persisted state file.
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Route a message without side effects.
    Route {
        /// Message text to route.
        #[arg(long)]
        test: String,
        /// Also dispatch to the winning skill and print the envelope.
        #[arg(long, default_value_t = false)]
        execute: bool,
    },
}

#[derive(Subcommand, Debug)]
enum AgentsCommand {
    List,
    /// Run one agent in the foreground until interrupted.
    Start { name: String },
    /// Stopping applies to a running `serve`; listed for completeness.
    Stop { name: String },
}

#[derive(Subcommand, Debug)]
enum SchedulesCommand {
    List,
}

#[derive(Subcommand, Debug)]
enum StateCommand {
    Save,
    Load,
    Clear,
}

/// The default report schedule set, shared by `serve` and `schedules list`.
fn default_schedule_specs() -> Vec<(&'static str, Duration, ReportKind)> {
    vec![
        ("market-report", Duration::from_secs(3600), ReportKind::Market),
        ("whale-report", Duration::from_secs(3600), ReportKind::Whale),
        ("content-report", Duration::from_secs(3600), ReportKind::Content),
        ("research-report", Duration::from_secs(86_400), ReportKind::Research),
    ]
}

struct Engine {
    config: Config,
    orchestrator: Orchestrator,
}

/// Wire every component. Registration only; nothing runs until `serve`
/// starts agents and schedules.
async fn build_engine(config: Config) -> anyhow::Result<Engine> {
    let root = CancellationToken::new();
    let state = StateStore::default();

    let endpoints: Vec<Arc<dyn Endpoint>> = config
        .rpc_endpoints
        .iter()
        .map(|url| {
            Arc::new(HttpJsonRpcEndpoint::new(
                endpoint_name(url),
                url.clone(),
                Duration::from_secs(10),
            )) as Arc<dyn Endpoint>
        })
        .collect();
    let dispatcher = Dispatcher::new(endpoints, config.dispatch_cache_ttl);

    let model = Arc::new(OpenAiChatModel::new(
        config.llm_endpoint.clone(),
        config.llm_api_key.clone().unwrap_or_default(),
        config.llm_model.clone(),
    ));
    let catalog = default_catalog(state.clone())?;
    let tool_loop = ToolLoop::new(model, catalog);

    let supervisor = Supervisor::new(
        state.clone(),
        root.clone(),
        SupervisorConfig {
            grace: config.shutdown_grace,
            ..SupervisorConfig::default()
        },
    );
    supervisor
        .register(
            Arc::new(MarketAgent::new(
                state.clone(),
                dispatcher.clone(),
                vec!["ETH".into(), "BTC".into(), "STRK".into()],
                vec![(
                    "ETH/USDC".to_string(),
                    vec!["ekubo".to_string(), "jediswap".to_string()],
                )],
                Duration::from_secs(30),
            )),
            true,
        )
        .await?;
    supervisor
        .register(
            Arc::new(WhaleAgent::new(
                state.clone(),
                dispatcher.clone(),
                50_000.0,
                Duration::from_secs(60),
            )),
            true,
        )
        .await?;
    supervisor
        .register(
            Arc::new(ResearchAgent::new(
                state.clone(),
                tool_loop.clone(),
                vec![
                    "Starknet DeFi liquidity trends".to_string(),
                    "L2 fee markets".to_string(),
                ],
                Duration::from_secs(3600),
            )),
            true,
        )
        .await?;
    supervisor
        .register(
            Arc::new(ContentAgent::new(
                state.clone(),
                tool_loop.clone(),
                Duration::from_secs(1800),
            )),
            true,
        )
        .await?;

    let scheduler = Scheduler::new(state.clone(), root.clone(), config.shutdown_grace);

    let orchestrator = Orchestrator::new(
        default_skills(),
        supervisor,
        scheduler,
        state,
        dispatcher,
        tool_loop,
        config.clone(),
        root,
    )?;

    Ok(Engine {
        config,
        orchestrator,
    })
}

fn endpoint_name(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or(url)
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("info");
    let cli = Cli::parse();
    let config = Config::from_env();

    let outcome = match cli.command {
        Command::Serve => serve(config).await,
        Command::Status => status(config).await,
        Command::Agents { command } => agents(config, command).await,
        Command::Schedules { command } => schedules(command),
        Command::State { command } => state_cmd(config, command).await,
        Command::Route { test, execute } => route(config, test, execute).await,
    };

    if let Err(err) = outcome {
        eprintln!("error: {err:#}");
        std::process::exit(EXIT_RUNTIME);
    }
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let orchestrator = engine.orchestrator.clone();

    for (name, interval, kind) in default_schedule_specs() {
        orchestrator
            .scheduler()
            .schedule(
                name,
                interval,
                report_task(kind, orchestrator.state().clone(), engine.config.reports_dir.clone()),
            )
            .await?;
    }

    let root = orchestrator.root_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            root.cancel();
        }
    });

    if let Some(bot_token) = engine.config.telegram_bot_token.clone() {
        if engine.config.allowed_telegram_users.is_empty() {
            warn!("ALLOWED_TELEGRAM_USERS is empty; the gateway will admit no one (set \"*\" to open it)");
        }
        let channel = Arc::new(TelegramChannel::new(
            bot_token,
            engine.config.allowed_telegram_users.clone(),
        ));
        let history = HistoryStore::open(
            &engine
                .config
                .state_file
                .with_file_name("gateway.db"),
        )
        .await?;
        tokio::spawn(run_gateway(
            orchestrator.clone(),
            channel,
            history,
            orchestrator.root_token().clone(),
        ));
        info!("telegram gateway attached");
    } else {
        warn!("TELEGRAM_BOT_TOKEN not set, running without a chat gateway");
    }

    orchestrator.run_forever().await?;
    Ok(())
}

/// Pump channel messages through the facade and reply, recording history.
async fn run_gateway(
    orchestrator: Orchestrator,
    channel: Arc<TelegramChannel>,
    history: HistoryStore,
    root: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(64);
    let listener = {
        let channel = channel.clone();
        tokio::spawn(async move {
            if let Err(err) = channel.listen(tx).await {
                warn!(%err, "channel listener exited");
            }
        })
    };

    loop {
        let message = tokio::select! {
            _ = root.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // Gateway-local slash commands never reach the router.
        if let Some(reply) = slash_command_reply(&message, &history).await {
            if let Err(err) = channel
                .send(&SendMessage {
                    recipient: message.reply_target.clone(),
                    content: reply,
                })
                .await
            {
                warn!(%err, "failed to deliver reply");
            }
            continue;
        }

        let inbound = InboundMessage {
            text: message.content.clone(),
            user_id: Some(message.sender.clone()),
            chat_id: Some(message.reply_target.clone()),
            timestamp: message.timestamp,
            attachments: Vec::new(),
        };
        let response = orchestrator.handle(inbound).await;
        if let Err(err) = history
            .record(
                &message.reply_target,
                &message.sender,
                &message.content,
                &response.body,
            )
            .await
        {
            warn!(%err, "failed to record chat history");
        }
        if let Err(err) = channel
            .send(&SendMessage {
                recipient: message.reply_target.clone(),
                content: response.body,
            })
            .await
        {
            warn!(%err, "failed to deliver reply");
        }
    }
    listener.abort();
}

/// `/history` replays the chat's recent exchanges from the history store.
async fn slash_command_reply(
    message: &ChannelMessage,
    history: &HistoryStore,
) -> Option<String> {
    if message.content.trim() != "/history" {
        return None;
    }
    let rows = match history.history(&message.reply_target, 5).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(%err, "failed to read chat history");
            return Some("history unavailable".to_string());
        }
    };
    if rows.is_empty() {
        return Some("No history for this chat yet.".to_string());
    }
    let total = history
        .message_count(&message.sender)
        .await
        .unwrap_or_default();
    let mut lines = vec![format!(
        "Last {} exchanges ({} messages from you overall):",
        rows.len(),
        total
    )];
    for (question, answer) in rows {
        lines.push(format!("> {question}"));
        lines.push(answer);
    }
    Some(lines.join("\n"))
}

async fn status(config: Config) -> anyhow::Result<()> {
    let state = StateStore::default();
    state.load(&config.state_file).await?;

    let revisions = state.revisions().await;
    println!("state file: {}", config.state_file.display());
    println!("tracked tokens: {}", state.market_all().await.len());
    println!("arbitrage entries: {}", state.arbitrage(None).await.len());
    println!("whale movements: {}", state.whales(None).await.len());
    println!("research reports: {}", state.research(None).await.len());
    println!("content pieces: {}", state.content(None).await.len());
    let mut sorted: Vec<_> = revisions.into_iter().collect();
    sorted.sort();
    for (name, revision) in sorted {
        println!("revision[{name}] = {revision}");
    }
    for alert in state.alerts(Some(AlertSeverity::Error), Some(5)).await {
        println!("alert: [{}] {}", alert.severity, alert.kind);
    }
    Ok(())
}

async fn agents(config: Config, command: AgentsCommand) -> anyhow::Result<()> {
    match command {
        AgentsCommand::List => {
            let engine = build_engine(config).await?;
            for status in engine.orchestrator.supervisor().status_all().await {
                println!(
                    "{}: {} (runs {}, autorestart {})",
                    status.name, status.state, status.run_count, status.autorestart
                );
            }
            Ok(())
        }
        AgentsCommand::Start { name } => {
            let engine = build_engine(config).await?;
            let orchestrator = engine.orchestrator.clone();
            orchestrator
                .state()
                .load(&engine.config.state_file)
                .await?;
            orchestrator.supervisor().start(&name).await?;
            println!("agent `{name}` running, ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for interrupt")?;
            orchestrator.supervisor().stop(&name).await?;
            orchestrator.state().save(&engine.config.state_file).await?;
            Ok(())
        }
        AgentsCommand::Stop { name } => {
            anyhow::bail!(
                "agent `{name}` can only be stopped from the running `serve` process"
            );
        }
    }
}

fn schedules(command: SchedulesCommand) -> anyhow::Result<()> {
    match command {
        SchedulesCommand::List => {
            for (name, interval, kind) in default_schedule_specs() {
                println!(
                    "{name}: every {}s → {} report",
                    interval.as_secs(),
                    kind.as_str()
                );
            }
            Ok(())
        }
    }
}

async fn state_cmd(config: Config, command: StateCommand) -> anyhow::Result<()> {
    let state = StateStore::default();
    match command {
        StateCommand::Save => {
            state.load(&config.state_file).await?;
            state.save(&config.state_file).await?;
            println!("state saved to {}", config.state_file.display());
        }
        StateCommand::Load => {
            state.load(&config.state_file).await?;
            let alerts = state.alerts(Some(AlertSeverity::Error), None).await;
            if alerts.is_empty() {
                println!("state file loads cleanly");
            } else {
                for alert in alerts {
                    println!("load alert: {}", alert.kind);
                }
            }
        }
        StateCommand::Clear => {
            state.save(&config.state_file).await?;
            println!("state cleared at {}", config.state_file.display());
        }
    }
    Ok(())
}

async fn route(config: Config, text: String, execute: bool) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let message = InboundMessage::from_user(text, "cli");

    let decision = engine.orchestrator.route(&message);
    println!("{}", serde_json::to_string_pretty(&decision)?);

    if execute {
        let response = engine.orchestrator.handle(message).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        match response.status {
            ResponseStatus::Ok => {}
            ResponseStatus::RateLimited => std::process::exit(EXIT_RATE_LIMITED),
            ResponseStatus::Error | ResponseStatus::Blocked => {
                std::process::exit(EXIT_RUNTIME)
            }
        }
    }
    Ok(())
}
