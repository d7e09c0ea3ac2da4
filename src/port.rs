use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
};
use tokio::net::TcpListener;
use tracing::debug;

use crate::error::{Error, Result};

/// Port the preview server tries first.
pub const DEFAULT_PORT: u16 = 3000;

/// Ports probed before giving up.
pub const MAX_PORT_ATTEMPTS: u32 = 1000;

/// Finds the first port from `start` upwards that can be bound on localhost.
pub fn find_available_port(start: u16) -> Result<u16> {
    find_available_port_on(IpAddr::V4(Ipv4Addr::LOCALHOST), start)
}

/// Finds the first port from `start` upwards that can be bound on `host`.
///
/// Each candidate is probed by binding a throwaway listener that is dropped
/// right away, so the port may be taken again before the caller binds it.
pub fn find_available_port_on(host: IpAddr, start: u16) -> Result<u16> {
    candidates(start)
        .find(|port| probe(host, *port))
        .ok_or_else(|| exhausted(start))
}

/// Binds a listener on the first free port from `start` upwards.
///
/// A port that was free when probed but is taken by the time it is bound
/// doesn't fail the call, the search continues with the next port. Retries
/// share the same budget of [`MAX_PORT_ATTEMPTS`] ports from `start`.
pub async fn bind_available(host: IpAddr, start: u16) -> Result<TcpListener> {
    for port in candidates(start) {
        if !probe(host, port) {
            continue;
        }

        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!(port, "port taken between probe and bind, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(exhausted(start))
}

fn probe(host: IpAddr, port: u16) -> bool {
    match StdTcpListener::bind(SocketAddr::new(host, port)) {
        Ok(_) => true,
        Err(e) => {
            debug!(port, "port unavailable: {}", e);
            false
        }
    }
}

fn candidates(start: u16) -> impl Iterator<Item = u16> {
    (start..=u16::MAX).take(MAX_PORT_ATTEMPTS as usize)
}

fn exhausted(start: u16) -> Error {
    Error::PortExhausted {
        start,
        attempts: candidates(start).count() as u32,
    }
}
