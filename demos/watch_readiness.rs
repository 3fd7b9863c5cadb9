//! Watch the readiness of a node dashboard.
//!
//! Demonstrates:
//! - Layering configuration from defaults, environment and a `?rpc=` override
//! - Mounting a shared context with the development keyring
//! - Printing every published snapshot
//! - Issuing a call through the request handle once ready
//! - Retrying manually after a failure
//!
//! Usage:
//!   cargo run --example watch_readiness
//!   cargo run --example watch_readiness -- --debug
//!   cargo run --example watch_readiness -- --rpc wss://rpc.example.org
//!   PROVIDER_SOCKET=ws://10.0.0.2:9944 cargo run --example watch_readiness

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use anyhow::Context;
use node_readiness::{EffectiveState, NodeConfig, ProviderEnvironment, SharedContext};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Args
// ============================================================================

/// Command-line arguments.
#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    rpc: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let rpc = args
            .iter()
            .position(|a| a == "--rpc")
            .and_then(|i| args.get(i + 1))
            .cloned();
        Self {
            debug: args.iter().any(|a| a == "--debug"),
            rpc,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "node_readiness=debug"
    } else {
        "node_readiness=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    println!("=== Watch Readiness ===\n");

    let mut builder = NodeConfig::builder()
        .with_env()
        .context("reading environment")?
        .development_keyring(true);
    if let Some(rpc) = &args.rpc {
        let page = format!("http://localhost/?rpc={rpc}");
        builder = builder
            .with_query_override(&page)
            .context("applying --rpc override")?;
    }
    let config = builder.build().context("building configuration")?;

    println!("[1] Endpoint: {}", config.endpoint());
    println!("    App name: {}\n", config.app_name());

    let context = SharedContext::mount(config, ProviderEnvironment::empty())?;

    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let _subscription = context.subscribe(move |snapshot| {
        let state = snapshot.effective();
        match &state {
            EffectiveState::Ready => println!(
                "[#{}] ready ({} identities, selected {:?})",
                snapshot.sequence(),
                snapshot.identities().len(),
                snapshot.selected().map(|a| a.as_str())
            ),
            EffectiveState::Loading(_) | EffectiveState::Error(_) => println!(
                "[#{}] {}",
                snapshot.sequence(),
                state.message().unwrap_or_default()
            ),
        }
        let _ = ready_tx.send(state);
    });

    println!("[2] Waiting for readiness (Ctrl+C to exit, 'r' + Enter retries on error)...\n");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            Some(state) = ready_rx.recv() => {
                if state.is_ready() {
                    report_chain(&context).await;
                }
            }

            line = line_rx.recv() => match line {
                Some(line) if line.trim() == "r" => context.retry_connection()?,
                Some(_) => {}
                None => break,
            },
        }
    }

    println!("\n[3] Tearing down...");
    context.teardown().await;
    println!("    ✓ Done");

    Ok(())
}

async fn report_chain(context: &SharedContext) {
    let Some(handle) = context.active_request_handle() else {
        return;
    };

    match tokio::time::timeout(Duration::from_secs(5), handle.request("system_chain", json!([]))).await {
        Ok(Ok(chain)) => println!("    chain: {chain}"),
        Ok(Err(e)) => println!("    chain query failed: {e}"),
        Err(_) => println!("    chain query timed out"),
    }
}
