use anyhow::{bail, Context, Result};
use lib_chat::retrieve::{ApiClient, HttpPageFetcher, HttpTokenProvider};
use lib_chat::ChatSession;
use tokio::signal;

mod chat_logic;
use chat_logic::{config, logger, tail};

fn api_client(url: &str, config: &config::Config) -> Result<ApiClient> {
    let client = ApiClient::new(url, config.session_token.clone())?;
    Ok(match &config.session_cookie {
        Some(cookie) => client.with_cookie(cookie.clone()),
        None => client,
    })
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env feeds clap's env fallbacks as well as the remaining CHAT_* settings.
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    logger::setup_logging(&config)?;

    let channels = config.channel_ids();
    if channels.is_empty() {
        bail!("No channels to watch. Pass --channel <id> or set CHAT_CHANNELS.");
    }

    let link = config.to_link_config().context("Invalid chat configuration")?;
    let token_url = link.token_url.clone().context("No token endpoint configured (CHAT_TOKEN_URL)")?;
    let history_url = link.history_url.clone().context("No history endpoint configured (CHAT_HISTORY_URL)")?;

    let tokens = HttpTokenProvider::new(api_client(token_url.as_str(), &config)?);
    let pages = HttpPageFetcher::new(api_client(history_url.as_str(), &config)?);

    let session = ChatSession::start(link, tokens, pages)?;
    tail::register_handlers(&session)?;

    let presence = tail::presence(config.user_id.as_deref(), config.username.as_deref());
    for id in &channels {
        let channel = session.watch_conversation(id, tail::cache_key(id), presence.clone())?;
        log::info!("Watching {}", channel);
    }

    let status_task = tokio::spawn(tail::log_status(session.status_updates()));

    wait_for_shutdown_signal().await;

    session.shutdown().await;
    if let Err(e) = status_task.await {
        log::warn!("Status logger ended abnormally: {}", e);
    }

    log::info!("Shutdown complete.");
    Ok(())
}
