//! CLI entry point: parses flags, wires logging and configuration, and feeds the dispatcher from
//! a newline-delimited JSON stream standing in for the real upgrade API's request parser (§4,
//! "CLI entry point").

use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, warn};

use agent_upgrade_dispatcher::config::{ManagerConfig, DEFAULT_CONFIG_PATH, OS_MAXSTR};
use agent_upgrade_dispatcher::dispatcher::Dispatcher;
use agent_upgrade_dispatcher::protocol::UnixSocketChannel;
use agent_upgrade_dispatcher::request::UpgradeRequest;
use agent_upgrade_dispatcher::tracker::SocketTaskTracker;
use agent_upgrade_dispatcher::validator::{FileExistsCustomValidator, Sha1WpkValidator};

/// Manager-side dispatcher for agent WPK upgrades.
#[derive(Parser, Debug)]
#[command(name = "upgrade-dispatcherd", about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Overrides the remote-request daemon socket path from the config file.
    #[arg(long)]
    socket_path: Option<String>,

    /// Filesystem path of the task-tracker daemon socket.
    #[arg(long, default_value = "/queue/ossec/task_tracker")]
    tracker_socket_path: String,

    /// Reads newline-delimited JSON requests from this file instead of stdin.
    #[arg(long)]
    requests: Option<String>,

    /// `tracing-subscriber` env-filter directive, e.g. `info`, `upgrade_dispatcher=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_level))
        .init();

    let config = match ManagerConfig::load(&cli.config) {
        Ok(mut cfg) => {
            if let Some(path) = &cli.socket_path {
                cfg.request_socket_path = path.clone();
            }
            cfg
        }
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    let channel = Arc::new(UnixSocketChannel::new(
        &config.request_socket_path,
        OS_MAXSTR,
    ));
    let tracker_channel = Box::new(UnixSocketChannel::new(&cli.tracker_socket_path, OS_MAXSTR));
    let tracker = Arc::new(SocketTaskTracker::new(tracker_channel));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&config),
        channel,
        Arc::new(Sha1WpkValidator),
        Arc::new(FileExistsCustomValidator),
        tracker,
    ));

    let dispatch_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::Builder::new()
            .name("upgrade-dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .expect("failed to spawn dispatch loop thread")
    };

    feed_requests(&dispatcher, cli.requests.as_deref());
    dispatcher.shutdown();

    if let Err(e) = dispatch_handle.join() {
        error!(?e, "dispatch loop thread panicked");
    }
    dispatcher.join_workers();
}

/// Reads newline-delimited JSON requests from `path`, or stdin when `path` is `None`. Malformed
/// lines are logged and skipped rather than aborting the stream (§6, "Inbound").
fn feed_requests(dispatcher: &Dispatcher, path: Option<&str>) {
    let reader: Box<dyn BufRead> = match path {
        Some(path) => {
            let file = std::fs::File::open(path).unwrap_or_else(|e| {
                error!(path, error = %e, "failed to open requests file");
                std::process::exit(1);
            });
            Box::new(std::io::BufReader::new(file))
        }
        None => Box::new(std::io::BufReader::new(std::io::stdin())),
    };

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to read a line of requests, skipping rest of stream");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<UpgradeRequest>(&line) {
            Ok(request) => dispatcher.enqueue(request),
            Err(e) => warn!(error = %e, line, "skipping malformed upgrade request"),
        }
    }
}
