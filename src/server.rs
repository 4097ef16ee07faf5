//! Broadcast relay server.
//!
//! Readiness-based model: poll tells us when sockets are ready, then we
//! perform non-blocking read/write syscalls. Uses epoll on Linux, kqueue on
//! macOS.
//!
//! Every accepted peer carries its own parse state and outbound queue, so a
//! peer that stalls mid-frame or reads slowly only grows its own queue and
//! never holds up anyone else. Each frame a peer completes is re-broadcast,
//! verbatim, to every other registered peer.

use crate::conn::ConnectionBuffer;
use crate::frame::{encode_frame, FrameEvent};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, error, info, trace};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Poll event batch size.
const EVENT_CAPACITY: usize = 1024;

/// Read scratch size per syscall.
const READ_CHUNK: usize = 4096;

/// One accepted peer: its socket, assembler, and current poll interest.
struct Peer {
    stream: TcpStream,
    buf: ConnectionBuffer,
    interest: Interest,
}

/// The relay server: listener plus registry of live peers.
///
/// Single-threaded; all peers are serviced by one poll loop. The registry is
/// a slab whose keys double as mio tokens.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    peers: Slab<Peer>,
}

impl Server {
    /// Bind the listening socket and set up the poll loop.
    pub fn bind(host: &str, port: u16) -> io::Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "host did not resolve"))?;

        let poll = Poll::new()?;
        let listener = create_listener(addr)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listener,
            peers: Slab::new(),
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Serve until `interrupted` returns true.
    ///
    /// A SIGINT handler installed without SA_RESTART makes `poll` return
    /// `EINTR`, which brings us back here to observe the flag.
    pub fn run<F: Fn() -> bool>(&mut self, interrupted: F) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "server listening");
        loop {
            if interrupted() {
                info!(peers = self.peers.len(), "interrupt received, shutting down");
                return Ok(());
            }
            self.poll_once(None)?;
        }
    }

    /// Wait for readiness at most `timeout` and dispatch one event batch.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        let mut events = std::mem::replace(&mut self.events, Events::with_capacity(0));

        match self.poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                self.events = events;
                return Ok(());
            }
            Err(e) => {
                self.events = events;
                return Err(e);
            }
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => self.accept_ready()?,
                Token(peer_id) => {
                    if event.is_readable() {
                        self.peer_readable(peer_id)?;
                    }
                    // Readable handling may have closed the peer.
                    if event.is_writable() && self.peers.contains(peer_id) {
                        self.flush_peer(peer_id)?;
                    }
                }
            }
        }

        self.events = events;
        Ok(())
    }

    /// Accept until the listener would block.
    fn accept_ready(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let peer_id = self.peers.insert(Peer {
                        stream,
                        buf: ConnectionBuffer::strict(),
                        interest: Interest::READABLE,
                    });

                    // Re-borrow after insert
                    let peer = &mut self.peers[peer_id];
                    self.poll.registry().register(
                        &mut peer.stream,
                        Token(peer_id),
                        Interest::READABLE,
                    )?;

                    debug!(peer_id, peer = %peer_addr, peers = self.peers.len(), "accepted connection");
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Drain a readable peer socket and broadcast every frame it completes.
    fn peer_readable(&mut self, peer_id: usize) -> io::Result<()> {
        let mut scratch = [0u8; READ_CHUNK];

        loop {
            let events = match self.peers.get_mut(peer_id) {
                Some(peer) => match peer.stream.read(&mut scratch) {
                    Ok(0) => {
                        // EOF: plain disconnect, partial frame or not.
                        debug!(peer_id, "peer disconnected");
                        self.close_peer(peer_id);
                        return Ok(());
                    }
                    Ok(n) => peer.buf.feed(&scratch[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(peer_id, error = %e, "read failed");
                        self.close_peer(peer_id);
                        return Ok(());
                    }
                },
                None => return Ok(()),
            };

            for event in events {
                match event {
                    FrameEvent::Frame(payload) => self.broadcast(peer_id, &payload)?,
                    FrameEvent::TooLong(declared) => {
                        debug!(peer_id, declared, "over-length frame, closing peer");
                        self.close_peer(peer_id);
                        return Ok(());
                    }
                    FrameEvent::ForbiddenByte => {
                        debug!(peer_id, "forbidden byte in payload, closing peer");
                        self.close_peer(peer_id);
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Enqueue one completed frame onto every other live peer and try to
    /// push it out right away.
    ///
    /// The recipient snapshot is taken at frame-completion time; a peer that
    /// disappears while we flush earlier recipients is simply skipped.
    fn broadcast(&mut self, sender: usize, payload: &[u8]) -> io::Result<()> {
        let frame = encode_frame(payload);
        let recipients: Vec<usize> = self
            .peers
            .iter()
            .map(|(id, _)| id)
            .filter(|&id| id != sender)
            .collect();

        trace!(
            from = sender,
            len = payload.len(),
            recipients = recipients.len(),
            "broadcast"
        );

        for peer_id in recipients {
            match self.peers.get_mut(peer_id) {
                Some(peer) => peer.buf.enqueue(&frame),
                None => continue,
            }
            self.flush_peer(peer_id)?;
        }
        Ok(())
    }

    /// Drain a peer's outbound queue as far as its socket accepts, then
    /// adjust its poll interest to match what is left.
    fn flush_peer(&mut self, peer_id: usize) -> io::Result<()> {
        let failed = match self.peers.get_mut(peer_id) {
            Some(peer) => match peer.buf.drain_writable(&mut peer.stream) {
                Ok(_) => false,
                Err(e) => {
                    debug!(peer_id, error = %e, "write failed");
                    true
                }
            },
            None => return Ok(()),
        };

        if failed {
            self.close_peer(peer_id);
            return Ok(());
        }

        self.update_interest(peer_id)
    }

    /// Keep WRITABLE interest registered exactly while the queue is
    /// non-empty (the poll backend is edge-triggered).
    fn update_interest(&mut self, peer_id: usize) -> io::Result<()> {
        let peer = match self.peers.get_mut(peer_id) {
            Some(peer) => peer,
            None => return Ok(()),
        };

        let wanted = if peer.buf.has_pending_writes() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        if peer.interest != wanted {
            self.poll
                .registry()
                .reregister(&mut peer.stream, Token(peer_id), wanted)?;
            peer.interest = wanted;
        }
        Ok(())
    }

    /// Remove a peer from the registry and release its socket. Queued
    /// outbound bytes and any partial inbound frame are abandoned.
    fn close_peer(&mut self, peer_id: usize) {
        if let Some(mut peer) = self.peers.try_remove(peer_id) {
            let _ = self.poll.registry().deregister(&mut peer.stream);
            debug!(peer_id, peers = self.peers.len(), "connection closed");
        }
    }
}

/// Create the non-blocking listening socket.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
