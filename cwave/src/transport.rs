//! TCP transport for the C-WAVE line protocol.
//!
//! # Protocol Overview
//!
//! Commands are ASCII lines terminated with CR (0x0D). Every command produces
//! exactly one reply line, terminated with CR or LF:
//!
//! ```text
//! -> opo_lambda?\r
//! <- opo_lambda:110000\r
//! -> galvo:1200\r
//! <- galvo:1200\r
//! -> bogus?\r
//! <- ?bogus\r
//! ```
//!
//! A reply starting with `?` means the device rejected the command. Otherwise
//! the payload is everything after the first `:` or `?`.
//!
//! # Multiplexing
//!
//! The device accepts only one connection, but the vendor's control
//! application can multiplex a second session onto it (connect to
//! `localhost` while C-WAVE Control is running). Replies to the other
//! session's commands may then sit in our receive buffer. Every exchange
//! therefore starts by draining the socket with a very short timeout, and
//! waits for its own reply with a long one since the multiplexer may delay it.
//!
//! # Example
//!
//! ```no_run
//! use cwave::Connection;
//!
//! let mut conn = Connection::new();
//! conn.connect("192.168.202.22:10001")?;
//! let version = conn.exchange("info?")?;
//! println!("Firmware: {version}");
//! # Ok::<(), cwave::CwaveError>(())
//! ```

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{CwaveError, CwaveResult};

/// Default TCP port of the C-WAVE.
pub const DEFAULT_PORT: u16 = 10001;

/// Read timeout used while draining stale input.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound on the whole drain phase, however much stale input keeps
/// arriving. A longer flush timeout extends it to one read.
pub const MAX_FLUSH_DURATION: Duration = Duration::from_millis(100);

/// Time allowed for a reply line, generous because of multiplexing delays.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Line terminator appended to every command.
const COMMAND_TERMINATOR: u8 = b'\r';

/// A request/response channel to a C-WAVE.
///
/// [`Connection`] is the TCP implementation. The device facade only depends
/// on this trait, so it can be driven by any other link (a scripted one in
/// tests, for example).
pub trait Link {
    /// Perform one complete exchange and return the reply payload.
    fn exchange(&mut self, command: &str) -> CwaveResult<String>;

    /// Whether exchanges can currently be attempted.
    fn is_connected(&self) -> bool;

    /// Close the link. Closing an already closed link does nothing.
    fn disconnect(&mut self);
}

/// TCP connection to a C-WAVE.
///
/// Starts out disconnected. State only changes through [`connect`](Self::connect)
/// and [`disconnect`](Self::disconnect); a failed exchange leaves it as it was
/// and nothing ever reconnects on its own.
///
/// Not safe to share between threads without external locking: the
/// flush/send/receive sequence of one exchange must not interleave with another.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    flush_timeout: Duration,
    response_timeout: Duration,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a disconnected connection with default timeouts.
    pub fn new() -> Self {
        Self {
            stream: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Create a disconnected connection using the timeouts from `config`.
    pub fn from_config(config: &ClientConfig) -> CwaveResult<Self> {
        let mut conn = Self::new();
        conn.set_flush_timeout(config.flush_timeout())?;
        conn.set_response_timeout(config.response_timeout())?;
        Ok(conn)
    }

    /// Open the TCP connection.
    ///
    /// An existing connection is closed first. No identity check happens here;
    /// that is the facade's job.
    ///
    /// # Errors
    ///
    /// Returns [`CwaveError::ConnectionFailed`] if the TCP connection cannot be
    /// established.
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> CwaveResult<()> {
        self.disconnect();

        let stream = TcpStream::connect(addr)
            .map_err(|e| CwaveError::ConnectionFailed(format!("Failed to connect: {e}")))?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.response_timeout))?;

        debug!(
            "Connected to C-WAVE at {}",
            stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the TCP connection, if open.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("Disconnected from C-WAVE");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Set the read timeout used while draining stale input.
    pub fn set_flush_timeout(&mut self, timeout: Duration) -> CwaveResult<()> {
        if timeout.is_zero() {
            return Err(CwaveError::InvalidArgument(
                "Flush timeout must be nonzero".to_string(),
            ));
        }
        self.flush_timeout = timeout;
        Ok(())
    }

    /// Set how long to wait for a reply line.
    pub fn set_response_timeout(&mut self, timeout: Duration) -> CwaveResult<()> {
        if timeout.is_zero() {
            return Err(CwaveError::InvalidArgument(
                "Response timeout must be nonzero".to_string(),
            ));
        }
        self.response_timeout = timeout;
        if let Some(stream) = &self.stream {
            stream.set_write_timeout(Some(timeout))?;
        }
        Ok(())
    }

    /// Send one command and return the payload of its reply.
    ///
    /// Drains stale input, writes `command` followed by CR, then reads bytes
    /// until CR or LF.
    ///
    /// # Errors
    ///
    /// - [`CwaveError::NotConnected`] without touching the socket if closed
    /// - [`CwaveError::InvalidArgument`] for non-ASCII or multi-line commands
    /// - [`CwaveError::Timeout`] if no terminator arrives in time
    /// - [`CwaveError::CommandFailed`] if the device rejects the command
    pub fn exchange(&mut self, command: &str) -> CwaveResult<String> {
        let stream = self.stream.as_mut().ok_or(CwaveError::NotConnected)?;

        if !command.is_ascii() || command.contains(['\r', '\n']) {
            return Err(CwaveError::InvalidArgument(format!(
                "Command must be a single ASCII line: {command:?}"
            )));
        }

        Self::flush_input(stream, self.flush_timeout)?;
        Self::send(stream, command)?;
        let response = Self::read_line(stream, command, self.response_timeout)?;
        Self::parse_response(command, &response)
    }

    /// Discard everything that is already waiting on the socket.
    ///
    /// Stops when a read times out or once [`MAX_FLUSH_DURATION`] has passed,
    /// so a peer that never goes quiet cannot stall the exchange.
    fn flush_input(stream: &mut TcpStream, timeout: Duration) -> CwaveResult<()> {
        stream.set_read_timeout(Some(timeout))?;
        let deadline = Instant::now() + MAX_FLUSH_DURATION.max(timeout);
        let mut buf = [0u8; 1024];
        loop {
            if Instant::now() >= deadline {
                warn!("Stale input still arriving after {MAX_FLUSH_DURATION:?}, sending anyway");
                return Ok(());
            }
            match stream.read(&mut buf) {
                // Peer closed; the receive phase reports it
                Ok(0) => return Ok(()),
                Ok(n) => {
                    trace!(
                        "Flushed stale input: {:?}",
                        String::from_utf8_lossy(&buf[..n])
                    );
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send(stream: &mut TcpStream, command: &str) -> CwaveResult<()> {
        debug!("C-WAVE send: {:?}", command);
        let mut msg = Vec::with_capacity(command.len() + 1);
        msg.extend_from_slice(command.as_bytes());
        msg.push(COMMAND_TERMINATOR);
        stream.write_all(&msg)?;
        stream.flush()?;
        Ok(())
    }

    /// Read one reply line, terminator excluded.
    fn read_line(stream: &mut TcpStream, command: &str, timeout: Duration) -> CwaveResult<String> {
        stream.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 1];
        let mut bytes = Vec::new();

        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(CwaveError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed by device",
                    )));
                }
                Ok(_) => match buf[0] {
                    b'\r' | b'\n' => break,
                    byte => bytes.push(byte),
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(CwaveError::Timeout {
                        command: command.to_string(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        // Bytes map to chars one-to-one so odd bytes never fail the exchange
        let response: String = bytes.iter().map(|&b| b as char).collect();
        trace!("C-WAVE recv: {:?}", response);
        Ok(response)
    }

    /// Extract the payload from a raw reply line.
    ///
    /// An empty reply or one starting with `?` is a failure of `command`.
    /// Otherwise everything after the first `:` or `?` is returned, or an
    /// empty string when there is no separator.
    ///
    /// # Example
    ///
    /// ```
    /// use cwave::Connection;
    ///
    /// let payload = Connection::parse_response("galvo?", "galvo:1200").unwrap();
    /// assert_eq!(payload, "1200");
    /// assert!(Connection::parse_response("bogus?", "?bogus").is_err());
    /// ```
    pub fn parse_response(command: &str, response: &str) -> CwaveResult<String> {
        if response.is_empty() || response.starts_with('?') {
            return Err(CwaveError::CommandFailed {
                command: command.to_string(),
            });
        }

        Ok(match response.find([':', '?']) {
            Some(idx) => response[idx + 1..].to_string(),
            None => String::new(),
        })
    }
}

impl Link for Connection {
    fn exchange(&mut self, command: &str) -> CwaveResult<String> {
        Connection::exchange(self, command)
    }

    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn disconnect(&mut self) {
        Connection::disconnect(self)
    }
}
