use std::fmt::{Display, Formatter};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use crate::{error::TransportError, running::RunningFlag};

/// How often blocking accept and connect backoff look at the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound on a port, accepted one client.
    Acceptor,
    /// Connected out to a server.
    Connector,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Acceptor => write!(f, "acceptor"),
            Role::Connector => write!(f, "connector"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub retry_delay: Duration,
    /// `None` retries until success or shutdown.
    pub max_attempts: Option<u32>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

/// Writes all of `buf`, looping over partial writes and retrying `EINTR`.
pub fn write_exact<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<(), TransportError> {
    let mut sent = 0;
    while sent < buf.len() {
        match w.write(&buf[sent..]) {
            Ok(0) => return Err(TransportError::incomplete(sent, buf.len(), None)),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::incomplete(sent, buf.len(), Some(e))),
        }
    }
    Ok(())
}

/// Fills all of `buf`. A zero-length read before that means the peer closed.
pub fn read_exact_into<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut received = 0;
    while received < buf.len() {
        match r.read(&mut buf[received..]) {
            Ok(0) => return Err(TransportError::incomplete(received, buf.len(), None)),
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::incomplete(received, buf.len(), Some(e))),
        }
    }
    Ok(())
}

/// A bound listening socket that has not accepted its client yet.
pub struct Listener {
    inner: TcpListener,
    running: RunningFlag,
}

impl Listener {
    pub fn bind(port: u16, running: RunningFlag) -> Result<Self, TransportError> {
        let inner = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| TransportError::Bind { port, source })?;
        inner
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind { port, source })?;
        if let Ok(addr) = inner.local_addr() {
            log::info!("listening on {}", addr);
        }
        Ok(Self { inner, running })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn accept_stream(&self) -> Result<TcpStream, TransportError> {
        loop {
            if !self.running.is_running() {
                return Err(TransportError::Interrupted);
            }
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                    log::info!("accepted connection from {}", peer);
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Accept(e)),
            }
        }
    }

    /// Blocks until one client connects. The listener is kept by the
    /// connection so [`Connection::reconnect`] can take the next client.
    pub fn accept(self) -> Result<Connection, TransportError> {
        let stream = self.accept_stream()?;
        Ok(Connection::from_stream(stream, Role::Acceptor, None, Some(self)))
    }
}

/// An established TCP peer connection.
pub struct Connection {
    role: Role,
    stream: TcpStream,
    target: Option<(String, u16, ConnectOptions, RunningFlag)>,
    listener: Option<Listener>,
}

impl Connection {
    /// Empty `address` makes this side the acceptor on `port`; otherwise it
    /// connects to `address:port`, retrying per `options`.
    pub fn open(
        address: &str,
        port: u16,
        running: RunningFlag,
        options: ConnectOptions,
    ) -> Result<Self, TransportError> {
        if address.is_empty() {
            Listener::bind(port, running)?.accept()
        } else {
            Self::connect(address, port, running, options)
        }
    }

    pub fn connect(
        address: &str,
        port: u16,
        running: RunningFlag,
        options: ConnectOptions,
    ) -> Result<Self, TransportError> {
        let stream = connect_with_retry(address, port, &running, &options)?;
        Ok(Self::from_stream(
            stream,
            Role::Connector,
            Some((address.to_string(), port, options, running)),
            None,
        ))
    }

    fn from_stream(
        stream: TcpStream,
        role: Role,
        target: Option<(String, u16, ConnectOptions, RunningFlag)>,
        listener: Option<Listener>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("failed to set TCP_NODELAY: {}", e);
        }
        Self {
            role,
            stream,
            target,
            listener,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn send_exact(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        write_exact(&mut self.stream, buf)
    }

    pub fn receive_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        read_exact_into(&mut self.stream, buf)
    }

    /// Re-establishes the peer relationship the way it was first made: the
    /// connector dials again, the acceptor takes the next client.
    pub fn reconnect(&mut self) -> Result<(), TransportError> {
        let _ = self.stream.shutdown(Shutdown::Both);
        let stream = match (&self.target, &self.listener) {
            (Some((address, port, options, running)), _) => {
                connect_with_retry(address, *port, running, options)?
            }
            (None, Some(listener)) => listener.accept_stream()?,
            (None, None) => return Err(TransportError::Interrupted),
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("failed to set TCP_NODELAY: {}", e);
        }
        self.stream = stream;
        log::info!("{} reconnected", self.role);
        Ok(())
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// A connection opened on first use, so a pipeline can be built up front and
/// block on accept/connect only inside its own thread.
pub enum LazyConnection {
    Endpoint {
        address: String,
        port: u16,
        options: ConnectOptions,
    },
    Ready(Connection),
}

impl LazyConnection {
    pub fn endpoint(address: &str, port: u16, options: ConnectOptions) -> Self {
        LazyConnection::Endpoint {
            address: address.to_string(),
            port,
            options,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LazyConnection::Ready(_))
    }

    pub fn get(&mut self, running: &RunningFlag) -> Result<&mut Connection, TransportError> {
        if let LazyConnection::Endpoint {
            address,
            port,
            options,
        } = self
        {
            let conn = Connection::open(address, *port, running.clone(), options.clone())?;
            *self = LazyConnection::Ready(conn);
        }
        match self {
            LazyConnection::Ready(conn) => Ok(conn),
            LazyConnection::Endpoint { .. } => Err(TransportError::Interrupted),
        }
    }

    /// The connection if it has been established.
    pub fn ready(&mut self) -> Option<&mut Connection> {
        match self {
            LazyConnection::Ready(conn) => Some(conn),
            LazyConnection::Endpoint { .. } => None,
        }
    }
}

fn connect_with_retry(
    address: &str,
    port: u16,
    running: &RunningFlag,
    options: &ConnectOptions,
) -> Result<TcpStream, TransportError> {
    let addr = format!("{}:{}", address, port);
    let mut attempt: u32 = 0;
    loop {
        if !running.is_running() {
            return Err(TransportError::Interrupted);
        }
        attempt += 1;
        match TcpStream::connect(&addr) {
            Ok(stream) => {
                log::info!("connected to {} after {} attempt(s)", addr, attempt);
                return Ok(stream);
            }
            Err(source) => {
                if options.max_attempts.is_some_and(|max| attempt >= max) {
                    return Err(TransportError::Connect { addr, source });
                }
                log::warn!(
                    "connect to {} failed: {}, retrying in {:?}",
                    addr,
                    source,
                    options.retry_delay
                );
                let deadline = Instant::now() + options.retry_delay;
                while running.is_running() {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    std::thread::sleep(left.min(POLL_INTERVAL));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;
