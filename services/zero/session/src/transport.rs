//! TCP and UDP channels shared between reader and writer workers.
//!
//! A TCP stream is registered with exactly one reader's poll. The writer
//! writes to the same stream and flips its interest to WRITABLE when the
//! kernel send buffer fills up, so the stream sits behind a mutex and
//! carries a clone of the owning poll's registry.

use mio::net::{TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};

/// A registered, non-blocking TCP stream
#[derive(Debug)]
pub struct SocketChannel {
    stream: Mutex<TcpStream>,
    registry: Registry,
    token: Token,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl SocketChannel {
    /// Wrap a stream already registered with `registry` under `token`
    pub fn new(stream: TcpStream, registry: Registry, token: Token) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        Ok(Self {
            stream: Mutex::new(stream),
            registry,
            token,
            peer_addr,
            local_addr,
        })
    }

    fn lock(&self) -> MutexGuard<'_, TcpStream> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Poll token this stream is registered under
    pub fn token(&self) -> Token {
        self.token
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking read
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.lock().read(buf)
    }

    /// Non-blocking write; may write fewer bytes than given
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    /// Ask the owning poll to report writability as well as readability
    pub fn interest_write(&self) -> io::Result<()> {
        let mut stream = self.lock();
        self.registry
            .reregister(&mut *stream, self.token, Interest::READABLE | Interest::WRITABLE)
    }

    /// Drop write interest
    pub fn interest_read(&self) -> io::Result<()> {
        let mut stream = self.lock();
        self.registry
            .reregister(&mut *stream, self.token, Interest::READABLE)
    }

    /// Deregister and shut the stream down; errors are ignored
    pub fn close(&self) {
        let mut stream = self.lock();
        let _ = self.registry.deregister(&mut *stream);
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// A bound UDP socket owned by one reader worker
#[derive(Debug)]
pub struct DatagramChannel {
    index: usize,
    socket: Arc<UdpSocket>,
}

impl DatagramChannel {
    /// Wrap a bound socket; `index` identifies it among the engine's UDP sockets
    pub fn new(index: usize, socket: Arc<UdpSocket>) -> Self {
        Self { index, socket }
    }

    /// Position among the engine's UDP sockets
    pub fn index(&self) -> usize {
        self.index
    }

    /// Local address
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send one datagram
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, target)
    }

    /// Receive one datagram
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }
}
