//! Hand-crafted SYN probe, for exercising a balancer by hand.

use anyhow::{Context, Result};
use clap::Parser;
use l3dsr::capture::RawTcpSocket;
use l3dsr::flow::ADVERTISED_WINDOW;
use l3dsr::wire::{TcpFlags, TcpSegment};
use std::net::Ipv4Addr;

/// Send a single TCP SYN with a chosen sequence number.
#[derive(Debug, Parser)]
#[command(name = "testsyn", version, about)]
struct Args {
    /// Source IPv4 address (must be local).
    src_ip: Ipv4Addr,

    /// Source port.
    src_port: u16,

    /// Destination IPv4 address.
    dst_ip: Ipv4Addr,

    /// Destination port.
    dst_port: u16,

    /// Sequence number to send.
    seq: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let syn = TcpSegment {
        src_port: args.src_port,
        dst_port: args.dst_port,
        seq: args.seq,
        ack: 0,
        flags: TcpFlags::SYN,
        window: ADVERTISED_WINDOW,
        options: Vec::new(),
        payload: Vec::new(),
    };
    let bytes = syn.to_bytes(args.src_ip, args.dst_ip);

    let socket = RawTcpSocket::bind(args.src_ip)
        .with_context(|| format!("opening raw socket on {}", args.src_ip))?;
    socket
        .send_segment(&bytes, args.dst_ip)
        .context("sending SYN")?;
    println!(
        "sent SYN {}:{} -> {}:{} seq={}",
        args.src_ip, args.src_port, args.dst_ip, args.dst_port, args.seq
    );
    Ok(())
}
