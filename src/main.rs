mod config;
mod telegram_log;
mod video;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use config::Config;
use video::command::{prompt_of, WELCOME_TEXT};
use video::workflow::JobOutcome;
use video::{
    AdmissionGate, Command, GenerateRequest, GenerationWorkflow, ReplyTarget, TelegramClient,
    UseApiClient,
};

type Workflow = GenerationWorkflow<UseApiClient, TelegramClient>;

struct BotState {
    workflow: Arc<Workflow>,
}

impl BotState {
    fn new(config: &Config, bot: &Bot) -> Result<Self, String> {
        let api = UseApiClient::new(
            config.useapi_token.clone(),
            config.submit_url.clone(),
            config.status_url.clone(),
        )?;
        let telegram = TelegramClient::new(bot.clone());
        let admission = AdmissionGate::new(config.admission_max_requests);

        match config.admission_max_requests {
            Some(max) => info!("Admission limit: {} request(s) per 3 minutes", max),
            None => info!("Admission gate is advisory (no limit set)"),
        }

        let workflow = GenerationWorkflow::new(
            Arc::new(api),
            Arc::new(telegram),
            Arc::new(admission),
            config.job.clone(),
            config.poll,
        );

        Ok(Self {
            workflow: Arc::new(workflow),
        })
    }
}

#[tokio::main]
async fn main() {
    let env_file = match std::env::args().nth(1) {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(".env")).filter(|p| p.exists()),
    };

    let config = match Config::load(env_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    let _guard = match init_logging(&config, &bot) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    info!("🚀 Starting hailuo-bot...");
    if let Some(ref path) = env_file {
        info!("Loaded env file {}", path.display());
    }

    let state = match BotState::new(&config, &bot) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register commands: {e}");
    }

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build();

    tokio::spawn(shutdown_on_sigterm(dispatcher.shutdown_token()));

    match config.webhook_url() {
        Some(url) => {
            let url: reqwest::Url = match url.parse() {
                Ok(url) => url,
                Err(e) => {
                    error!("Invalid webhook URL {url}: {e}");
                    std::process::exit(1);
                }
            };
            let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
            info!("Webhook mode: {} (listening on {})", url, addr);

            let listener = match webhooks::axum(bot, webhooks::Options::new(addr, url)).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to set up webhook: {e}");
                    std::process::exit(1);
                }
            };

            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            info!("Long polling mode (WEBHOOK_DOMAIN not set)");
            dispatcher.dispatch().await;
        }
    }

    info!("Bot stopped.");
}

fn init_logging(config: &Config, bot: &Bot) -> Result<WorkerGuard, String> {
    std::fs::create_dir_all(&config.log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {e}", config.log_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join("hailuo-bot.log"))
        .map_err(|e| format!("Failed to open log file: {e}"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let filter = || {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    let telegram_layer = config
        .log_chat_id
        .map(|chat_id| telegram_log::TelegramLogLayer::new(bot.clone(), chat_id));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter()),
        )
        .with(telegram_layer)
        .init();

    Ok(guard)
}

/// SIGINT is handled by the dispatcher itself; this covers SIGTERM.
async fn shutdown_on_sigterm(token: ShutdownToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                return;
            }
        };
        sigterm.recv().await;
        info!("SIGTERM received, stopping");
        match token.shutdown() {
            Ok(done) => done.await,
            Err(e) => warn!("Shutdown failed: {e}"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = token;
    }
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<BotState>,
) -> ResponseResult<()> {
    match cmd {
        Command::Start => {
            bot.send_message(msg.chat.id, WELCOME_TEXT).await?;
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Generate(argument) => {
            let request = GenerateRequest {
                requester: msg
                    .from
                    .as_ref()
                    .map(|u| u.id.0 as i64)
                    .unwrap_or(msg.chat.id.0),
                target: ReplyTarget {
                    chat_id: msg.chat.id.0,
                    message_id: msg.id.0 as i64,
                },
                prompt: prompt_of(&argument),
                received_at_ms: chrono::Utc::now().timestamp_millis(),
            };
            info!("🎬 /generate from {} in chat {}", request.requester, request.target.chat_id);

            // Admit here so window updates follow arrival order
            let admission = state.workflow.admit(&request);
            let workflow = state.workflow.clone();
            tokio::spawn(async move {
                match workflow.run_admitted(request, admission).await {
                    Ok(JobOutcome::Delivered { video_url }) => info!("Delivered {}", video_url),
                    Ok(JobOutcome::Failed { reason }) => warn!("Job failed: {}", reason),
                    Ok(JobOutcome::TimedOut { attempts }) => {
                        warn!("Job timed out after {} checks", attempts)
                    }
                    Err(_) => {}
                }
            });
        }
    }

    Ok(())
}
