//! Parley terminal client.
//!
//! # Usage
//!
//! ```bash
//! # Join the lobby as alice
//! parley --server ws://chat.example:8080 --room lobby --name alice
//!
//! # Route messages through the replicated store
//! parley --room lobby --replicated
//! ```
//!
//! Lines typed on stdin are sent to the active channel; `/help` lists the
//! commands. Logs go to stderr.

mod commands;
mod terminal;

use std::{io::Write, path::PathBuf};

use clap::Parser;
use parley_client::{ChatHandle, ClientConfig, ClientError, MessageRoute, RedbStorage, SystemEnv, WsConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    commands::{Command, parse},
    terminal::TerminalPresenter,
};

/// Parley chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Terminal client for parley chat rooms")]
#[command(version)]
struct Args {
    /// Server base URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Room to join
    #[arg(short, long, default_value = "lobby")]
    room: String,

    /// Display name (defaults to the one saved by a previous run)
    #[arg(short, long)]
    name: Option<String>,

    /// Initially active channel
    #[arg(short, long, default_value = "general")]
    channel: String,

    /// Directory for the local database
    #[arg(long, default_value = ".parley")]
    data_dir: PathBuf,

    /// Crypto worker threads
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Send messages as replicated rows instead of control frames
    #[arg(long)]
    replicated: bool,

    /// Do not connect the replicated store to the sync relay
    #[arg(long, conflicts_with = "replicated")]
    no_sync: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

const HELP: &str = "commands: /nick <name>  /join  /leave  /channel <name>  /thread [id]  \
                    /reply <id> <text>  /key [passphrase]  /nokey  /quit";

type Chat = ChatHandle<RedbStorage, SystemEnv>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    std::fs::create_dir_all(&args.data_dir)?;
    let storage = RedbStorage::open(args.data_dir.join("parley.redb"))?;

    let config = ClientConfig {
        server_url: args.server,
        room: args.room,
        channel: args.channel,
        worker_count: args.workers.max(1),
        route: if args.replicated { MessageRoute::Replicated } else { MessageRoute::Control },
        sync_enabled: !args.no_sync,
        ..ClientConfig::default()
    };
    tracing::info!(room = %config.room, server = %config.server_url, "parley starting");

    let chat = parley_client::start(config, storage, WsConnector::new(), SystemEnv::new(), TerminalPresenter).await?;

    if let Err(e) = chat.join(args.name.as_deref()).await {
        say(&format!("not joined ({e}); pick a name with /nick <name>"));
    }
    say(HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match run_command(&chat, parse(&line)).await {
            Ok(true) => {},
            Ok(false) => break,
            Err(e) => say(&format!("error: {e}")),
        }
    }

    chat.shutdown().await?;
    Ok(())
}

/// Returns `false` on `/quit`.
async fn run_command(chat: &Chat, command: Command) -> Result<bool, ClientError> {
    match command {
        Command::Message { text } => {
            chat.send_message(&text).await?;
        },
        Command::Reply { to, text } => {
            chat.send_reply(&text, &to).await?;
        },
        Command::Nick { name } => chat.join(Some(&name)).await?,
        Command::Join => chat.join(None).await?,
        Command::Leave => chat.leave()?,
        Command::Channel { name } => {
            chat.set_channel(&name)?;
            say(&format!("-- now in #{name}"));
        },
        Command::Thread { root } => {
            let opened = root.is_some();
            chat.set_thread(root);
            say(if opened { "-- thread opened" } else { "-- thread closed" });
        },
        Command::SetKey { passphrase } => {
            let fingerprint = chat.set_room_password(&passphrase).await?;
            say(&format!("-- room key set ({fingerprint})"));
        },
        Command::ShowKey => match (chat.room_password()?, chat.key_fingerprint()) {
            (Some(passphrase), Some(fingerprint)) => say(&format!("-- passphrase {passphrase:?} ({fingerprint})")),
            (None, Some(fingerprint)) => say(&format!("-- room key {fingerprint}")),
            (_, None) => say("-- no room key, messages are sent unencrypted"),
        },
        Command::ClearKey => {
            chat.clear_room_password()?;
            say("-- room key cleared");
        },
        Command::Help => say(HELP),
        Command::Quit => return Ok(false),
        Command::Unknown { input } => say(&format!("unknown command: {input}\n{HELP}")),
        Command::InvalidArgs { command, error } => say(&format!("/{command}: {error}")),
    }
    Ok(true)
}

fn say(text: &str) {
    let _ = writeln!(std::io::stdout().lock(), "{text}");
}
