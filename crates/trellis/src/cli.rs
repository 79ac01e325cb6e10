//! CLI surface and the node launcher.

use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use crossbeam::channel::unbounded;

use trellis_core::{encode_id, random_id};

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::rpc::{self, RemoteContact, RpcError};
use crate::settings::Settings;
use crate::storage::FileStorage;
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(
    name = "trellis",
    version,
    about = "A node of the trellis decentralized indexing overlay",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Path to a TOML config file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a node until interrupted.
    Run(RunArgs),
    /// Print a fresh random node name.
    Name,
}

#[derive(clap::Args, Debug, Default)]
pub struct RunArgs {
    /// Node name (defaults to a random identifier).
    #[arg(long)]
    pub name: Option<String>,

    /// Address advertised to peers.
    #[arg(long)]
    pub ip: Option<String>,

    /// Port of the peer-to-peer surface.
    #[arg(long)]
    pub p2p_port: Option<u16>,

    /// Port of the monitoring surface.
    #[arg(long)]
    pub monitoring_port: Option<u16>,

    /// Bootstrap peer as `ip|port`.
    #[arg(long, value_name = "IP|PORT")]
    pub bootstrap: Option<String>,

    /// Backup path prefix.
    #[arg(long, value_name = "PATH")]
    pub storage: Option<PathBuf>,

    /// Seconds between recurring rounds.
    #[arg(long)]
    pub delay_secs: Option<u64>,

    /// Cache entry lifetime, in seconds.
    #[arg(long)]
    pub expiration_secs: Option<u64>,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Name => {
            println!("{}", encode_id(&random_id()));
            Ok(())
        }
        Command::Run(args) => run_node(cli.config.as_deref(), args),
    }
}

fn resolve_config(path: Option<&Path>, args: &RunArgs) -> Result<Config> {
    let mut config = config::load(path)?;
    config::apply_env_overrides(&mut config);

    if args.name.is_some() {
        config.name = args.name.clone();
    }
    if let Some(ip) = &args.ip {
        config.ip = ip.clone();
    }
    if let Some(port) = args.p2p_port {
        config.p2p_port = port;
    }
    if let Some(port) = args.monitoring_port {
        config.monitoring_port = port;
    }
    if args.bootstrap.is_some() {
        config.bootstrap = args.bootstrap.clone();
    }
    if let Some(storage) = &args.storage {
        config.storage = storage.clone();
    }
    if let Some(delay) = args.delay_secs {
        config.delay_secs = delay;
    }
    if let Some(expiration) = args.expiration_secs {
        config.expiration_secs = expiration;
    }
    Ok(config)
}

fn run_node(config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    let config = resolve_config(config_path, &args)?;
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| encode_id(&random_id()));

    tracing::info!(
        name = %name,
        p2p_port = config.p2p_port,
        monitoring_port = config.monitoring_port,
        bootstrap = config.bootstrap.as_deref().unwrap_or("-"),
        storage = %config.storage.display(),
        "starting node"
    );

    let settings = Settings::new(
        &name,
        &config.ip,
        config.p2p_port,
        Duration::from_secs(config.delay_secs),
        Duration::from_secs(config.expiration_secs),
        config.delegation_threshold,
        config.set_length,
    )?;
    let storage = Arc::new(FileStorage::new(&config.storage)?);
    let bootstraps = config.bootstrap_contacts()?;
    let node = Node::new(settings, RemoteContact::factory(), bootstraps, storage)?;

    let p2p_listener = bind(config.p2p_port)?;
    let monitoring_listener = bind(config.monitoring_port)?;

    let (server_err_tx, server_err_rx) = unbounded::<RpcError>();
    {
        let node = Arc::clone(&node);
        let errs = server_err_tx.clone();
        std::thread::spawn(move || {
            if let Err(err) = rpc::p2p::serve(p2p_listener, node) {
                let _ = errs.send(err);
            }
        });
    }
    {
        let node = Arc::clone(&node);
        std::thread::spawn(move || {
            if let Err(err) = rpc::monitoring::serve(monitoring_listener, node) {
                let _ = server_err_tx.send(err);
            }
        });
    }

    let mut worker = Worker::spawn(Arc::clone(&node));

    let term = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&term))
            .map_err(|err| Error::Rpc(RpcError::Io(err)))?;
    }

    let outcome = loop {
        if term.load(Ordering::Relaxed) {
            tracing::info!("shutdown signal received");
            break Ok(());
        }
        crossbeam::select! {
            recv(worker.fatal()) -> msg => match msg {
                Ok(err) => break Err(err),
                Err(_) => break Ok(()),
            },
            recv(server_err_rx) -> msg => match msg {
                Ok(err) => break Err(Error::Rpc(err)),
                Err(_) => break Ok(()),
            },
            default(Duration::from_millis(250)) => {}
        }
    };

    worker.close();
    let joined = worker.join();
    tracing::info!("node stopped");
    outcome.and(joined)
}

fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .map_err(|err| Error::Rpc(RpcError::Io(err)))
}
