//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--config server.json] [--addr 0.0.0.0:6000]
//!                                [--tick-ms 1000] [--write-timeout-ms 2000] [--map 1.map]
//!
//! The server accepts player connections, applies their updates and broadcasts
//! a world snapshot every tick.
//!
//! Console commands:
//!   status         - Show server status
//!   players        - List connected players
//!   kick <name>    - Disconnect a player
//!   quit           - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use arena_server::GameServer;
use arena_shared::config::ArenaConfig;
use tokio::sync::mpsc;
use tracing::{error, info};

fn parse_args() -> anyhow::Result<ArenaConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            ArenaConfig::from_file(path)?
        }
        None => ArenaConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-ms" if i + 1 < args.len() => {
                cfg.tick_interval_ms = args[i + 1].parse().unwrap_or(cfg.tick_interval_ms);
                i += 2;
            }
            "--write-timeout-ms" if i + 1 < args.len() => {
                cfg.write_timeout_ms = args[i + 1].parse().unwrap_or(cfg.write_timeout_ms);
                i += 2;
            }
            "--read-timeout-ms" if i + 1 < args.len() => {
                cfg.read_timeout_ms = args[i + 1].parse().ok();
                i += 2;
            }
            "--map" if i + 1 < args.len() => {
                cfg.map_file = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_ms = cfg.tick_interval_ms, map = %cfg.map_file, "Starting server");

    let server = Arc::new(GameServer::bind(cfg).await.context("create server")?);
    let local = server.local_addr()?;
    info!(%local, rows = server.map().height(), "Server listening");

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status', 'players', 'kick <name>' or 'quit'.");
    println!();

    let accept = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    let mut quit = false;
    while let Some(line) = console_rx.recv().await {
        if matches!(line.as_str(), "quit" | "exit") {
            quit = true;
            break;
        }
        for out in server.exec_console(&line).await {
            println!("{out}");
        }
    }

    if quit {
        info!("Server shutting down");
        return Ok(());
    }

    // Stdin closed without `quit` (e.g. running detached): keep serving.
    match accept.await {
        Ok(res) => res,
        Err(e) => {
            error!(error = %e, "Accept task panicked");
            Err(e.into())
        }
    }
}
