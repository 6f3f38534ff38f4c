//! Terminal chat client: join the room, then type messages. `/quit`, EOF or Ctrl-C leaves.

use std::io::Write;
use std::sync::Arc;

use roomchat::chat::render::{render_chat, render_join_form};
use roomchat::chat::{ChatSession, HttpCredentialSource};
use roomchat::config::ClientConfig;
use roomchat::realtime::AblyConnector;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

fn draw(screen: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{}{}", CLEAR_SCREEN, screen)?;
    stdout.flush()
}

fn redraw(session: &ChatSession) -> std::io::Result<()> {
    let me = session.username().unwrap_or_default();
    draw(&render_chat(session.view(), me, session.is_connected()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let credentials = Arc::new(HttpCredentialSource::new(config.issuer_url.clone()));
    let connector = Arc::new(AblyConnector::new(&config));
    let mut session = ChatSession::new(credentials, connector);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    draw(&render_join_form(false))?;
    loop {
        let Some(name) = lines.next_line().await? else {
            return Ok(());
        };
        if name.trim().is_empty() {
            draw(&render_join_form(false))?;
            continue;
        }
        draw(&render_join_form(true))?;
        match session.join(&name).await {
            Ok(()) => break,
            Err(e) => {
                draw(&render_join_form(false))?;
                eprintln!("\nFailed to connect to chat. Please check your API key and try again. ({e})");
            }
        }
    }

    session.process_pending();
    redraw(&session)?;

    let mut events_open = true;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(text) if text.trim() == "/quit" => break,
                    Some(text) => {
                        if let Err(e) = session.send(&text).await {
                            tracing::warn!(error = %e, "publish failed");
                        }
                    }
                    None => break,
                }
            }
            open = session.next_event(), if events_open => {
                events_open = open;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
        session.process_pending();
        redraw(&session)?;
    }

    session.teardown().await;
    Ok(())
}
