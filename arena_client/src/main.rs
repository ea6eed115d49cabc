//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--config client.json] [--addr 127.0.0.1:6000]
//!                                [--name Player] [--color "#00ff00"] [--send-ms 1000]
//!
//! The client connects to the server, reports its position on a fixed
//! interval and tracks received snapshots.
//!
//! Console commands:
//!   status          - Show client status
//!   players         - List players in the latest snapshot
//!   walk <units>    - Move forward (negative for back)
//!   strafe <units>  - Move right (negative for left)
//!   turn <degrees>  - Turn left (negative for right)
//!   look <degrees>  - Pitch up (negative for down)
//!   move <f> <r>    - Hold movement input, axes in [-1, 1]
//!   spin <yaw> <p>  - Hold turn/pitch input, axes in [-1, 1]
//!   stop            - Release all held input
//!   shoot <name>    - Fire at another player
//!   quit            - Disconnect and exit

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use arena_client::{
    client::{ClientState, GameClient},
    input::{step, InputState},
};
use arena_shared::{config::ArenaConfig, state::clamp_pitch};
use tokio::{sync::mpsc, time::Instant};
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn parse_args() -> anyhow::Result<ArenaConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).context("--config needs a path")?;
            ArenaConfig::from_file(path)?
        }
        None => ArenaConfig {
            server_addr: "127.0.0.1:6000".to_string(),
            ..Default::default()
        },
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--color" if i + 1 < args.len() => {
                cfg.player_color = args[i + 1].clone();
                i += 2;
            }
            "--send-ms" if i + 1 < args.len() => {
                cfg.send_interval_ms = args[i + 1].parse().unwrap_or(cfg.send_interval_ms);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Executes a console command. Returns `None` for `quit`.
async fn exec_console(client: &mut GameClient, line: &str) -> anyhow::Result<Option<Vec<String>>> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(&cmd) = tokens.first() else {
        return Ok(Some(Vec::new()));
    };
    let amount = || tokens.get(1).and_then(|t| t.parse::<f64>().ok());

    let out = match cmd {
        "status" => {
            let mut out = vec![
                format!("State: {:?}", client.state),
                format!("Server: {}", client.server_peer()),
                format!(
                    "Local: pos=({:.2}, {:.2}, {:.2}) h={:.1} p={:.1} color={}",
                    client.local.x,
                    client.local.y,
                    client.local.z,
                    client.local.h,
                    client.local.p,
                    client.color
                ),
                format!("Colour RGBA: {:?}", client.rgba),
                format!("Input: {:?}", client.input),
                format!("Snapshots buffered: {}", client.snaps.len()),
            ];
            if let Some(map) = &client.map {
                out.push(format!("Map rows: {}", map.len()));
            }
            if let Some(me) = client.own_state() {
                out.push(format!("HP: {}{}", me.hp, if me.is_alive() { "" } else { " (dead)" }));
            }
            out
        }
        "players" => match client.players() {
            Some(snap) => snap
                .players
                .iter()
                .map(|(name, st)| {
                    let mut line = format!(
                        "  {name}: pos=({:.2}, {:.2}, {:.2}) hp={} color={}",
                        st.x, st.y, st.z, st.hp, st.color
                    );
                    if let Some((x, y, z)) = client.smoothed_position(name) {
                        line.push_str(&format!(" smooth=({x:.2}, {y:.2}, {z:.2})"));
                    }
                    line
                })
                .collect(),
            None => vec!["No snapshot yet".to_string()],
        },
        "walk" | "strafe" => match amount() {
            Some(d) if cmd == "walk" => {
                step(&mut client.local, d, 0.0);
                Vec::new()
            }
            Some(d) => {
                step(&mut client.local, 0.0, d);
                Vec::new()
            }
            None => vec![format!("Usage: {cmd} <units>")],
        },
        "turn" => match amount() {
            Some(deg) => {
                client.local.h += deg;
                Vec::new()
            }
            None => vec!["Usage: turn <degrees>".to_string()],
        },
        "look" => match amount() {
            Some(deg) => {
                client.local.p = clamp_pitch(client.local.p + deg);
                Vec::new()
            }
            None => vec!["Usage: look <degrees>".to_string()],
        },
        "move" | "spin" => {
            let axis = |i: usize| tokens.get(i).and_then(|t| t.parse::<f64>().ok());
            match (axis(1), axis(2)) {
                (Some(a), Some(b)) if cmd == "move" => {
                    client.input.forward = a;
                    client.input.right = b;
                    Vec::new()
                }
                (Some(a), Some(b)) => {
                    client.input.yaw = a;
                    client.input.pitch = b;
                    Vec::new()
                }
                _ if cmd == "move" => vec!["Usage: move <forward> <right>".to_string()],
                _ => vec!["Usage: spin <yaw> <pitch>".to_string()],
            }
        }
        "stop" => {
            client.input = InputState::default();
            Vec::new()
        }
        "shoot" => match tokens.get(1) {
            Some(target) => {
                client.shoot(target).await?;
                Vec::new()
            }
            None => vec!["Usage: shoot <name>".to_string()],
        },
        "quit" | "exit" => return Ok(None),
        other => vec![format!("Unknown command: {other}")],
    };
    Ok(Some(out))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

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

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let send_interval = cfg.send_interval();
    let mut next_send = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_count = 0usize;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match exec_console(&mut client, &line).await {
                Ok(Some(output)) => {
                    for line in output {
                        println!("{line}");
                    }
                }
                Ok(None) => {
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                Err(e) => println!("Error: {e}"),
            }
        }

        let now = Instant::now();
        client.advance(now.duration_since(last_frame).as_secs_f64());
        last_frame = now;

        if now >= next_send {
            next_send = now + send_interval;
            if let Err(e) = client.send_position().await {
                println!("Send error: {e}");
            }
        }

        if let Err(e) = client.poll(POLL_INTERVAL).await {
            println!("Connection error: {e}");
        }

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        if let Some(snap) = client.players() {
            if snap.players.len() != last_count {
                last_count = snap.players.len();
                info!(players = last_count, "Snapshot");
            }
        }
    }

    Ok(())
}
