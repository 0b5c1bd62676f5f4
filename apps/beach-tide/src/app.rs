use std::io::{BufRead, IsTerminal};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::LogBuffer;
use crate::cli::{Cli, Command};
use crate::collapse::ProgressClassifier;
use crate::config::{Config, Endpoints};
use crate::error::TideError;
use crate::persistence::FileSessionStore;
use crate::session::{self, EMPTY_PLACEHOLDER, TailOptions, TailSession};
use crate::snapshot::{HttpLogSource, LogSource};
use crate::transport::WebSocketTransport;
use crate::view::TerminalView;

pub async fn run(cli: Cli) -> Result<(), TideError> {
    let config = cli.to_config();
    config.validate()?;
    let endpoints = config.endpoints()?;
    let source = HttpLogSource::new(endpoints.snapshot.clone(), endpoints.clear.clone());

    match cli.command() {
        Command::Follow => follow(&config, endpoints, source, cli.fresh).await,
        Command::Snapshot => {
            let buffer = LogBuffer::from_text(&source.fetch_snapshot().await?);
            if buffer.is_empty() {
                println!("{EMPTY_PLACEHOLDER}");
            } else {
                print!("{}", buffer.render());
            }
            Ok(())
        }
        Command::Clear => {
            let response = source.clear().await?;
            println!("{response:#}");
            Ok(())
        }
    }
}

async fn follow(
    config: &Config,
    endpoints: Endpoints,
    source: HttpLogSource,
    fresh: bool,
) -> Result<(), TideError> {
    let store = FileSessionStore::new(&config.state_dir(), &config.session_key());
    if fresh {
        store.reset()?;
    }
    info!(
        target: "beach_tide::app",
        stream = %endpoints.stream,
        state = %store.path().display(),
        "following server log"
    );

    let mut session = TailSession::new(
        WebSocketTransport::new(),
        Arc::new(source),
        TerminalView::stdout(),
        store,
        TailOptions {
            stream_url: endpoints.stream,
            reconnect_delay: config.reconnect_delay,
            classifier: ProgressClassifier::new(config.progress_marker.clone()),
        },
    );

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    spawn_command_reader(commands_tx)?;
    session.run(commands_rx, shutdown_signal()).await;
    Ok(())
}

/// Stdin is read on a plain thread so a blocked read never holds up exit.
fn spawn_command_reader(
    commands: mpsc::UnboundedSender<session::Command>,
) -> Result<(), TideError> {
    // A terminal echoes what was typed, which pushes the log output up a row.
    let echoes = std::io::stdin().is_terminal();
    thread::Builder::new()
        .name("beach-tide-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        debug!(target: "beach_tide::app", error = %err, "stdin closed");
                        break;
                    }
                };
                if echoes && commands.send(session::Command::Echo).is_err() {
                    break;
                }
                match session::Command::parse(&line) {
                    Some(command) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => {
                        warn!(
                            target: "beach_tide::app",
                            input = %line.trim(),
                            "unknown command; try refresh, clear, reconnect or quit"
                        );
                    }
                }
            }
        })?;
    Ok(())
}
