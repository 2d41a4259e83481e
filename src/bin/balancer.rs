//! Balancer daemon: terminate client handshakes and forward tagged
//! frames to the backend segment.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use l3dsr::balancer::{
    finalize_outbound, Backend, BackendConfig, BalancerConfig, BalancerEngine, SingleServerPool,
    StateTable,
};
use l3dsr::capture::{bpf_expr, iface, L2Capture, L2Injector};
use l3dsr::wire::{Frame, MacAddr};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// L3-DSR balancer.
#[derive(Debug, Parser)]
#[command(name = "balancer", version, about)]
struct Args {
    /// Interface to listen on.
    #[arg(long, default_value = "eth1")]
    interface: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Balancer index stamped into the TOS byte of outbound packets.
    #[arg(long = "lb-index", default_value_t = 1)]
    lb_index: u8,

    /// Backend server IPv4 address.
    #[arg(long = "backend-ip", default_value = "192.168.34.10")]
    backend_ip: Ipv4Addr,

    /// Backend server MAC address.
    #[arg(long = "backend-mac", default_value = "08:00:27:33:d1:63")]
    backend_mac: MacAddr,

    /// TOML configuration file; overrides the individual flags.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<BalancerConfig> {
        let config = match self.config {
            Some(path) => BalancerConfig::from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let config = BalancerConfig {
                    interface: self.interface,
                    port: self.port,
                    lb_index: self.lb_index,
                    backend: BackendConfig {
                        ip: self.backend_ip,
                        mac: self.backend_mac,
                    },
                };
                config.validate()?;
                config
            },
        };
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Args::parse().into_config()?;
    let local = iface::lookup(&config.interface)
        .with_context(|| format!("resolving interface {}", config.interface))?;

    let filter = bpf_expr(config.port, local.ipv4);
    let mut capture = L2Capture::open(&config.interface, &filter)
        .with_context(|| format!("opening capture on {}", config.interface))?;
    let mut injector = L2Injector::open(&config.interface)
        .with_context(|| format!("opening injector on {}", config.interface))?;

    let pool = Arc::new(SingleServerPool::with_server(Backend {
        ipv4: config.backend.ip,
        mac: config.backend.mac,
    }));
    let engine = BalancerEngine::new(Arc::new(StateTable::new()), pool);

    info!(
        interface = %config.interface, addr = %local.ipv4, port = config.port,
        lb_index = config.lb_index, backend = %config.backend.ip, "balancer starting"
    );

    // Rendezvous handoff: a slow injection loop backpressures the
    // capture loop.
    let (tx, rx) = bounded::<Frame>(0);
    let lb_index = config.lb_index;
    thread::spawn(move || inject_loop(rx, &mut injector, lb_index));

    loop {
        let packet = match capture.next_frame() {
            Ok(packet) => packet,
            Err(e) => {
                error!(error = %e, "capture failed");
                return Err(e.into());
            },
        };
        let frame = match Frame::parse(&packet) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping unparseable frame");
                continue;
            },
        };
        if let Some(out) = engine.process(frame) {
            if tx.send(out).is_err() {
                error!("injection loop gone, shutting down");
                return Ok(());
            }
        }
    }
}

fn inject_loop(rx: Receiver<Frame>, injector: &mut L2Injector, lb_index: u8) {
    for frame in rx {
        let bytes = finalize_outbound(frame, lb_index);
        if let Err(e) = injector.inject(&bytes) {
            warn!(error = %e, "inject failed");
        }
    }
}
