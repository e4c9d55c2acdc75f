//! CasperFlow gateway.
//!
//! Usage:
//!   casperflow serve --port 3000 --node https://node.testnet.casper.network/rpc
//!   casperflow deploy --wasm subscription_manager.wasm --secret-key secret_key.pem

use anyhow::{Context, Result};
use casperflow_billing::{Reconciler, SettlementOrchestrator};
use casperflow_gateway::{AppState, GatewayConfig, build_router, install_contract};
use casperflow_ledger::{LedgerClient, SignerKeys};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{fs, path::PathBuf, sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "casperflow")]
#[command(about = "CasperFlow subscription gateway and contract deploy tool")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger RPC endpoint; repeat to add failover nodes
    #[arg(long = "node", global = true)]
    nodes: Vec<String>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the verification API
    Serve {
        /// HTTP port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Install the subscription contract
    Deploy {
        /// Compiled contract wasm
        #[arg(long)]
        wasm: PathBuf,

        /// PKCS#8 PEM secret key of the installing account
        #[arg(long)]
        secret_key: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = GatewayConfig::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?
        .with_nodes(args.nodes);

    match args.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            config.validate().context("invalid configuration")?;
            serve(config).await
        }
        Command::Deploy { wasm, secret_key } => {
            config.ledger.validate().context("invalid ledger configuration")?;
            deploy(config, wasm, secret_key).await
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn serve(config: GatewayConfig) -> Result<()> {
    info!("CasperFlow gateway starting...");
    let state = Arc::new(AppState::from_config(&config).context("failed to initialize services")?);

    if config.reconcile_interval_secs > 0 {
        spawn_reconciler(
            state.orchestrator.clone(),
            Duration::from_secs(config.reconcile_interval_secs),
        );
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("\n========================================");
    println!("  CasperFlow Gateway Running");
    println!("========================================");
    println!("  Network:   {}", config.network);
    println!("  Chain:     {}", config.ledger.chain_name);
    println!("  Contract:  {}", config.ledger.contract_hash);
    println!("  HTTP:      http://{addr}");
    for node in &config.ledger.endpoints {
        println!("  Node:      {node}");
    }
    println!("========================================\n");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    info!("gateway stopped");
    Ok(())
}

fn spawn_reconciler(orchestrator: Arc<SettlementOrchestrator>, every: Duration) {
    let reconciler = Reconciler::new(orchestrator);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconciler.run_once().await {
                Ok(report) => debug!(?report, "reconciliation pass"),
                Err(e) => warn!(error = %e, "reconciliation pass failed"),
            }
        }
    });
    info!(every_secs = every.as_secs(), "reconciler started");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn deploy(config: GatewayConfig, wasm: PathBuf, secret_key: PathBuf) -> Result<()> {
    let pem = fs::read_to_string(&secret_key)
        .with_context(|| format!("failed to read {}", secret_key.display()))?;
    let signer = SignerKeys::from_pem(&pem).context("failed to load secret key")?;
    let module = fs::read(&wasm).with_context(|| format!("failed to read {}", wasm.display()))?;

    let client = LedgerClient::new(config.ledger).context("failed to create ledger client")?;
    let receipt = install_contract(&client, &signer, module, Utc::now())
        .await
        .context("contract deploy failed")?;

    println!("\n========================================");
    println!("  Contract Deploy Submitted");
    println!("========================================");
    println!("  Account:     {}", receipt.account);
    println!("  Deploy hash: {}", receipt.deploy_hash);
    println!("  Explorer:    {}", receipt.explorer_url);
    println!("========================================\n");
    println!("Once executed, read the contract hash from the account's named keys.");
    Ok(())
}
