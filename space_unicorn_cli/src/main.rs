use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod client;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let token = CancellationToken::new();
    let hits = Arc::new(AtomicUsize::new(0));
    {
        let token = token.clone();
        let hits = hits.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_ok() {
                    match hits.fetch_add(1, Ordering::Relaxed) {
                        0 => {
                            eprintln!("Ctrl+C, shutting down (press again to force)");
                            token.cancel();
                        }
                        _ => {
                            eprintln!("Force exiting.");
                            std::process::exit(130);
                        }
                    }
                }
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let t = token.clone();
        tokio::spawn(async move {
            if let Ok(mut term) = signal(SignalKind::terminate()) {
                term.recv().await;
                eprintln!("SIGTERM, shutting down");
                t.cancel();
            }
        });
    }

    let args = Arguments::parse();
    match args.command {
        Command::Serve(args) => server::run(args, token).await,
        Command::Connect(args) => client::run(args, token).await,
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Duplex messaging over WebSocket with HTTP long-poll fallback")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run an echo server.
    Serve(server::ServeArgs),

    /// Connect to a server and exchange lines from stdin.
    Connect(client::ConnectArgs),
}
