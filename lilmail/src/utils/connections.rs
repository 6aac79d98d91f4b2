//
// lilmail - utils/connections.rs
//
// Copyright 2017 Emmanouil Pitsidianakis <manos@pitsidianak.is>
//
// This file is part of lilmail.
//
// lilmail is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// lilmail is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with lilmail. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Blocking TCP dialing with a bounded timeout, and the [`Connection`]
//! transport sessions read from and write to.

use std::{
    io::{Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::{Error, ErrorKind, NetworkErrorKind, Result};

/// Opens a TCP connection to a remote host.
///
/// Candidate addresses are tried one after another, alternating between
/// IPv6 and IPv4. `timeout` bounds the whole dial, not each attempt: every
/// attempt is given whatever is left of it.
pub fn connect<A: ToSocketAddrs>(addr: A, timeout: Option<Duration>) -> Result<TcpStream> {
    let start = Instant::now();
    let timeout_left = || -> Result<Option<Duration>> {
        let Some(v) = timeout else {
            return Ok(None);
        };
        Ok(Some(
            v.checked_sub(Instant::now() - start)
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    Error::new("Connection timed out.")
                        .set_kind(ErrorKind::Network(NetworkErrorKind::Timeout))
                })?,
        ))
    };

    let mut last_error: Option<Error> = None;
    for a in prepare_addresses(addr)? {
        let sock = Socket::new(Domain::for_address(a), Type::STREAM, Some(Protocol::TCP))?;
        let saddr = SockAddr::from(a);
        let attempt = match timeout_left()? {
            Some(left) => sock.connect_timeout(&saddr, left),
            None => sock.connect(&saddr),
        };
        match attempt {
            Ok(()) => {
                sock.set_nodelay(true)?;
                return Ok(sock.into());
            }
            Err(err) => {
                log::debug!("Could not connect to {}: {}", a, err);
                last_error.get_or_insert(Error::from(err).set_summary(format!(
                    "Could not connect to {}",
                    a
                )));
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        Error::new("Could not resolve to any address")
            .set_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed))
    }))
}

/// Resolve addresses and order them to alternate between IPv6 and IPv4.
fn prepare_addresses<A>(addr: A) -> Result<Vec<SocketAddr>>
where
    A: ToSocketAddrs,
{
    let (addrs_v4, addrs_v6): (Vec<_>, Vec<_>) = addr
        .to_socket_addrs()
        .map_err(|err| {
            Error::from(err)
                .set_summary("Name lookup of host failed")
                .set_kind(ErrorKind::Network(NetworkErrorKind::HostLookupFailed))
        })?
        .partition(|a| match a {
            SocketAddr::V4(_) => true,
            SocketAddr::V6(_) => false,
        });
    let mut addrs = Vec::with_capacity(addrs_v4.len() + addrs_v6.len());
    let (mut left, mut right) = (addrs_v6.into_iter(), addrs_v4.into_iter());
    while let Some(a) = left.next() {
        addrs.push(a);
        std::mem::swap(&mut left, &mut right);
    }
    addrs.extend(right);
    Ok(addrs)
}

/// A plain or TLS-wrapped socket.
pub enum Connection {
    Tcp {
        inner: TcpStream,
        id: Option<&'static str>,
        trace: bool,
    },
    #[cfg(feature = "tls")]
    Tls {
        inner: native_tls::TlsStream<TcpStream>,
        id: Option<&'static str>,
        trace: bool,
    },
}

use Connection::*;

impl std::fmt::Debug for Connection {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let (variant, inner) = match self {
            Tcp { ref inner, .. } => (stringify!(Tcp), inner),
            #[cfg(feature = "tls")]
            Tls { ref inner, .. } => (stringify!(Tls), inner.get_ref()),
        };
        fmt.debug_struct(stringify!(Connection))
            .field("variant", &variant)
            .field("id", &self.id())
            .field("trace", &self.is_trace_enabled())
            .field("peer", &inner.peer_addr().ok())
            .finish()
    }
}

impl Connection {
    pub const IO_BUF_SIZE: usize = 64 * 1024;

    pub fn new_tcp(inner: TcpStream) -> Self {
        Self::Tcp {
            inner,
            id: None,
            trace: false,
        }
    }

    /// Negotiate TLS on top of an established TCP stream.
    #[cfg(feature = "tls")]
    pub fn new_tls(
        inner: TcpStream,
        domain: &str,
        danger_accept_invalid_certs: bool,
    ) -> Result<Self> {
        let mut connector = native_tls::TlsConnector::builder();
        if danger_accept_invalid_certs {
            connector.danger_accept_invalid_certs(true);
        }
        let connector = connector.build().map_err(|err| {
            Error::from(err).set_kind(ErrorKind::Network(NetworkErrorKind::InvalidTLSConnection))
        })?;
        let inner = match connector.connect(domain, inner) {
            Ok(v) => v,
            Err(native_tls::HandshakeError::Failure(err)) => {
                return Err(Error::from(err)
                    .set_summary(format!("Could not initiate TLS negotiation to {}.", domain)));
            }
            Err(native_tls::HandshakeError::WouldBlock(_)) => {
                return Err(Error::new(format!("TLS negotiation to {} timed out.", domain))
                    .set_kind(ErrorKind::Network(NetworkErrorKind::Timeout)));
            }
        };
        Ok(Self::Tls {
            inner,
            id: None,
            trace: false,
        })
    }

    pub fn trace(mut self, val: bool) -> Self {
        match self {
            Tcp { ref mut trace, .. } => *trace = val,
            #[cfg(feature = "tls")]
            Tls { ref mut trace, .. } => *trace = val,
        }
        self
    }

    pub fn with_id(mut self, val: &'static str) -> Self {
        match self {
            Tcp { ref mut id, .. } => *id = Some(val),
            #[cfg(feature = "tls")]
            Tls { ref mut id, .. } => *id = Some(val),
        }
        self
    }

    fn tcp_stream(&self) -> &TcpStream {
        match self {
            Tcp { ref inner, .. } => inner,
            #[cfg(feature = "tls")]
            Tls { ref inner, .. } => inner.get_ref(),
        }
    }

    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.tcp_stream().set_read_timeout(dur)
    }

    pub fn set_write_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        self.tcp_stream().set_write_timeout(dur)
    }

    /// Close both halves of the socket. Pending and later reads fail.
    pub fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Tcp { ref inner, .. } => inner.shutdown(Shutdown::Both),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => {
                _ = inner.shutdown();
                inner.get_ref().shutdown(Shutdown::Both)
            }
        }
    }

    fn is_trace_enabled(&self) -> bool {
        match self {
            Tcp { trace, .. } => *trace,
            #[cfg(feature = "tls")]
            Tls { trace, .. } => *trace,
        }
    }

    fn id(&self) -> Option<&'static str> {
        match self {
            Tcp { id, .. } => *id,
            #[cfg(feature = "tls")]
            Tls { id, .. } => *id,
        }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let res = match self {
            Tcp { ref mut inner, .. } => inner.read(buf),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.read(buf),
        };
        if self.is_trace_enabled() {
            let id = self.id().unwrap_or_default();
            match &res {
                Ok(len) => log::trace!(
                    "[{}]: read {} bytes: {:?}",
                    id,
                    len,
                    String::from_utf8_lossy(&buf[..*len])
                ),
                Err(err) => log::trace!("[{}]: could not read: {}", id, err),
            }
        }
        res
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_trace_enabled() {
            log::trace!(
                "[{}]: writing {} bytes: {:?}",
                self.id().unwrap_or_default(),
                buf.len(),
                String::from_utf8_lossy(buf)
            );
        }
        match self {
            Tcp { ref mut inner, .. } => inner.write(buf),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Tcp { ref mut inner, .. } => inner.flush(),
            #[cfg(feature = "tls")]
            Tls { ref mut inner, .. } => inner.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn test_connect_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = connect(addr, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[test]
    fn test_connect_refused_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = connect(addr, Some(Duration::from_secs(5))).unwrap_err();
        assert!(err.kind.is_network(), "{:?}", err.kind);
        assert!(err.kind.is_retryable());
    }

    #[test]
    fn test_prepare_addresses_alternates() {
        let addrs: Vec<SocketAddr> = vec![
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.2:1".parse().unwrap(),
            "[::1]:1".parse().unwrap(),
        ];
        let prepared = prepare_addresses(&addrs[..]).unwrap();
        assert_eq!(prepared.len(), 3);
        assert!(prepared[0].is_ipv6());
        assert!(prepared[1].is_ipv4());
        assert!(prepared[2].is_ipv4());
    }
}
