// LAN chat daemon: UDP discovery, role election, TCP chat sessions.

mod config;
mod discovery;
mod manager;
mod reactor;
mod transport;

use lanchat_core::ChatEvent;
use tokio::io::AsyncBufReadExt;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lanchat-daemon {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = config::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (manager, mut events) = manager::Manager::start(cfg).await?;

        // Single consumer context for presentation: transport callbacks
        // never print directly.
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ChatEvent::Message {
                        text,
                        sender,
                        is_self: _,
                    } => println!("{sender}: {text}"),
                    ChatEvent::Info(text) => println!("* {text}"),
                    ChatEvent::PeerLost { peer } => println!("* {peer} disconnected"),
                }
            }
        });

        let stdin_manager = manager.clone();
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                stdin_manager.send(line).await;
            }
        });

        shutdown_signal().await?;
        info!("shutting down");
        Ok(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
