//! Process entrypoint: CLI parsing, config load/validate, logging init, and
//! the bind/serve split so a failure mode maps to a distinct exit code.

use std::process::ExitCode;

use clap::Parser;

use match3_battle_hub::config;
use match3_battle_hub::hub::HubState;
use match3_battle_hub::logging;
use match3_battle_hub::websocket;

/// Realtime coordination core for a two-player turn-based match-3 battle game.
#[derive(Parser, Debug)]
#[command(name = "battle-hub", version, about)]
struct Cli {
    /// Validate the resolved configuration and exit (0 if valid, 2 otherwise).
    #[arg(short = 'c', long = "validate-config", conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the resolved configuration as JSON and exit without binding.
    #[arg(long = "print-config")]
    print_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let cfg = config::load();

    if cli.validate_config {
        return match config::validate(&cfg) {
            Ok(()) => {
                println!("configuration is valid");
                ExitCode::from(0)
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(2)
            }
        };
    }

    if cli.print_config {
        match serde_json::to_string_pretty(&cfg) {
            Ok(json) => {
                println!("{json}");
                return ExitCode::from(0);
            }
            Err(err) => {
                eprintln!("failed to serialize configuration: {err}");
                return ExitCode::from(2);
            }
        }
    }

    if let Err(err) = config::validate(&cfg) {
        eprintln!("{err}");
        return ExitCode::from(2);
    }

    logging::init_with_config(&cfg.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start the tokio runtime: {err}");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(run(cfg))
}

async fn run(cfg: config::HubConfig) -> ExitCode {
    let port = cfg.port;
    let hub = HubState::new(cfg);
    hub.spawn_background_tasks();

    let listener = match websocket::bind(port).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(port, %err, "failed to bind the configured port");
            return ExitCode::from(1);
        }
    };

    tokio::select! {
        result = websocket::serve(hub, listener) => {
            if let Err(err) = result {
                tracing::error!(%err, "hub server exited with an error");
                return ExitCode::from(1);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    ExitCode::from(0)
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(_) => return,
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
