//! Packet-bridge daemon: splice tagged client flows onto real TCP
//! sessions with the co-located backend, and return backend replies
//! straight to the client.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use l3dsr::bridge::{BalancerRegistry, BridgeConfig, BridgeEngine, BridgeReply, BridgeTable};
use l3dsr::capture::{bpf_expr, iface, L2Capture, L2Injector, RawTcpSocket, MAX_DATAGRAM};
use l3dsr::wire::{Frame, TcpSegment};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// L3-DSR packet bridge.
#[derive(Debug, Parser)]
#[command(name = "packetbridge", version, about)]
struct Args {
    /// Front-end (client-facing) interface.
    #[arg(long, default_value = "eth1")]
    frontend: String,

    /// Back-end interface; its address is the backend endpoint.
    #[arg(long, default_value = "eth2")]
    backend: String,

    /// Port to splice.
    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Balancers as INDEX:IP[,INDEX:IP...].
    #[arg(long, default_value = "1:192.168.34.30")]
    balancers: BalancerRegistry,

    /// TOML configuration file; overrides the individual flags.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<BridgeConfig> {
        let config = match self.config {
            Some(path) => BridgeConfig::from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => {
                let config = BridgeConfig {
                    frontend: self.frontend,
                    backend: self.backend,
                    port: self.port,
                    balancers: self.balancers,
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
    let frontend = iface::lookup(&config.frontend)
        .with_context(|| format!("resolving interface {}", config.frontend))?;
    let backend = iface::lookup(&config.backend)
        .with_context(|| format!("resolving interface {}", config.backend))?;

    let filter = bpf_expr(config.port, frontend.ipv4);
    let mut capture = L2Capture::open(&config.frontend, &filter)
        .with_context(|| format!("opening capture on {}", config.frontend))?;
    let mut injector = L2Injector::open(&config.frontend)
        .with_context(|| format!("opening injector on {}", config.frontend))?;
    let socket = Arc::new(
        RawTcpSocket::bind(frontend.ipv4)
            .with_context(|| format!("opening raw socket on {}", frontend.ipv4))?,
    );

    let engine = Arc::new(BridgeEngine::new(
        Arc::new(BridgeTable::new()),
        config.balancers.clone(),
        frontend.mac,
        backend.ipv4,
        config.port,
    ));

    info!(
        frontend = %frontend.ipv4, backend = %backend.ipv4, port = config.port,
        balancers = config.balancers.len(), "packet bridge starting"
    );

    // Rendezvous channels between the loops; see the engine docs for the
    // topology. Per-flow ordering holds because each flow is driven by
    // exactly one producing loop at a time.
    let (backend_tx, backend_rx) = bounded::<TcpSegment>(0);
    let (client_tx, client_rx) = bounded::<Frame>(0);

    {
        let socket = Arc::clone(&socket);
        let src = frontend.ipv4;
        let dst = backend.ipv4;
        thread::spawn(move || backend_send_loop(backend_rx, &socket, src, dst));
    }
    thread::spawn(move || inject_loop(client_rx, &mut injector));
    {
        let engine = Arc::clone(&engine);
        let socket = Arc::clone(&socket);
        let backend_tx = backend_tx.clone();
        thread::spawn(move || backend_read_loop(&socket, &engine, backend_tx, client_tx));
    }

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
        if let Some(segment) = engine.process_client(frame) {
            if backend_tx.send(segment).is_err() {
                error!("backend sender gone, shutting down");
                return Ok(());
            }
        }
    }
}

/// Serialize backend-bound segments and write them through the raw
/// socket; the kernel builds the IPv4 header.
fn backend_send_loop(rx: Receiver<TcpSegment>, socket: &RawTcpSocket, src: Ipv4Addr, dst: Ipv4Addr) {
    for segment in rx {
        let bytes = segment.to_bytes(src, dst);
        if let Err(e) = socket.send_segment(&bytes, dst) {
            warn!(
                error = %e, dst = %dst, dst_port = segment.dst_port,
                "raw socket write failed"
            );
        }
    }
}

/// Read backend datagrams and fan the engine's replies out to the
/// backend sender and the client injector.
fn backend_read_loop(
    socket: &RawTcpSocket,
    engine: &BridgeEngine,
    backend_tx: Sender<TcpSegment>,
    client_tx: Sender<Frame>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (src, tcp_bytes) = match socket.recv_segment(&mut buf) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!(error = %e, "raw socket read failed");
                continue;
            },
        };
        let segment = match TcpSegment::parse(tcp_bytes) {
            Ok(segment) => segment,
            Err(e) => {
                debug!(error = %e, "dropping unparseable backend datagram");
                continue;
            },
        };
        for reply in engine.process_backend(src, segment) {
            let delivered = match reply {
                BridgeReply::ToBackend(segment) => backend_tx.send(segment).is_ok(),
                BridgeReply::ToClient(frame) => client_tx.send(frame).is_ok(),
            };
            if !delivered {
                error!("downstream loop gone, stopping backend reader");
                return;
            }
        }
    }
}

/// Inject return-path frames on the client-facing interface.
fn inject_loop(rx: Receiver<Frame>, injector: &mut L2Injector) {
    for frame in rx {
        if let Err(e) = injector.inject(&frame.to_bytes()) {
            warn!(error = %e, "inject failed");
        }
    }
}
