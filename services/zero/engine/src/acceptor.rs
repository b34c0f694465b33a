//! Listening sockets and the accept loop.

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::reader::ReaderEngine;
use mio::net::{TcpListener, UdpSocket};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use zero_session::WAKER_TOKEN;

/// Bound TCP listeners waiting for the accept loop
pub(crate) struct Listeners {
    tcp: Vec<TcpListener>,
    udp: Vec<UdpSocket>,
}

impl Listeners {
    /// Bind every configured port; the first failure aborts startup
    pub(crate) fn bind(tcp: &[SocketAddr], udp: &[SocketAddr]) -> Result<Self> {
        let tcp = tcp
            .iter()
            .map(|&addr| {
                TcpListener::bind(addr).map_err(|source| EngineError::Bind { addr, source })
            })
            .collect::<Result<Vec<_>>>()?;
        let udp = udp
            .iter()
            .map(|&addr| {
                UdpSocket::bind(addr).map_err(|source| EngineError::Bind { addr, source })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tcp, udp })
    }

    /// Bound TCP addresses, resolving port 0 to the assigned port
    pub(crate) fn tcp_addresses(&self) -> Vec<SocketAddr> {
        self.tcp.iter().filter_map(|l| l.local_addr().ok()).collect()
    }

    /// Bound UDP addresses
    pub(crate) fn udp_addresses(&self) -> Vec<SocketAddr> {
        self.udp.iter().filter_map(|s| s.local_addr().ok()).collect()
    }
}

/// Running accept loop
pub(crate) struct Acceptor {
    waker: Waker,
}

impl Acceptor {
    /// Hand UDP sockets to the readers and start accepting TCP connections
    pub(crate) fn start(
        listeners: Listeners,
        context: Arc<EngineContext>,
        readers: Arc<ReaderEngine>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let Listeners { tcp, udp } = listeners;

        for (index, socket) in udp.into_iter().enumerate() {
            if let Ok(addr) = socket.local_addr() {
                info!(%addr, "UDP socket bound");
            }
            readers.register_datagram(index, socket);
        }

        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let mut listeners = tcp;
        for (i, listener) in listeners.iter_mut().enumerate() {
            poll.registry()
                .register(listener, Token(i + 1), Interest::READABLE)?;
            if let Ok(addr) = listener.local_addr() {
                info!(%addr, "TCP listener bound");
            }
        }

        let worker = AcceptLoop {
            poll,
            listeners,
            context,
            readers,
        };
        let name = "zero-acceptor".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|source| EngineError::Spawn { name, source })?;

        Ok((Self { waker }, handle))
    }

    /// Interrupt the poll so the loop sees the halt flag
    pub(crate) fn wake(&self) {
        let _ = self.waker.wake();
    }
}

struct AcceptLoop {
    poll: Poll,
    listeners: Vec<TcpListener>,
    context: Arc<EngineContext>,
    readers: Arc<ReaderEngine>,
}

impl AcceptLoop {
    fn run(mut self) {
        let mut events = Events::with_capacity(self.listeners.len().max(1) * 4);
        while !self.context.is_halted() {
            if let Err(e) = self.poll.poll(&mut events, Some(self.context.poll_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "Acceptor poll failed");
                break;
            }
            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let index = event.token().0 - 1;
                if index < self.listeners.len() {
                    self.accept_all(index);
                }
            }
        }
        // listeners close on drop
        debug!(listeners = self.listeners.len(), "Acceptor stopped");
    }

    fn accept_all(&mut self, index: usize) {
        let filter = self.context.manager.filter().clone();
        loop {
            match self.listeners[index].accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = filter.validate_and_add(addr.ip()) {
                        debug!(%addr, reason = %e, "Connection refused");
                        self.context.stats.add_refused_connection();
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                        continue;
                    }
                    self.context.stats.add_accepted_connection();
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(%addr, "Connection accepted");
                    self.readers.register_stream(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if is_per_connection_error(e.kind()) => {
                    debug!(error = %e, "Pending connection dropped before accept");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    return;
                }
            }
        }
    }
}

/// Accept errors that concern one queued connection, not the listener.
/// The rest of the backlog can still be accepted after these.
fn is_per_connection_error(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
    )
}
