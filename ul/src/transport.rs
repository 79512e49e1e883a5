//! Transport module
//!
//! The association state machine only needs a byte stream
//! which can be opened, closed, and read with a bounded wait.
//! This module defines that interface as the [`Transport`] trait
//! and provides [`TcpTransport`], its implementation over TCP.
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// A byte stream between two application entities.
///
/// Reading from or writing to a transport which is not open
/// fails with an error of kind [`NotConnected`](std::io::ErrorKind::NotConnected).
pub trait Transport: Read + Write {
    /// Open a connection to the given address.
    fn open(&mut self, address: &str) -> io::Result<()>;

    /// Close the connection.
    /// Closing a transport which is not open has no effect.
    fn close(&mut self) -> io::Result<()>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;

    /// Bound the time spent waiting on the next reads.
    ///
    /// `None` waits indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl<T: ?Sized + Transport> Transport for Box<T> {
    fn open(&mut self, address: &str) -> io::Result<()> {
        (**self).open(address)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }
}

/// Options for the underlying TCP socket.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SocketOptions {
    /// Maximum time to wait for the connection to be established
    pub connection_timeout: Option<Duration>,
    /// Read timeout applied to the socket
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to the socket
    pub write_timeout: Option<Duration>,
}

/// A transport over a TCP stream.
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    options: SocketOptions,
}

fn not_connected() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "transport is not open")
}

impl TcpTransport {
    /// Create a transport which is not connected yet.
    pub fn new(options: SocketOptions) -> Self {
        TcpTransport {
            stream: None,
            options,
        }
    }

    /// Create a transport over an accepted TCP stream,
    /// applying the read and write timeouts of the given options.
    pub fn from_stream(stream: TcpStream, options: SocketOptions) -> io::Result<Self> {
        stream.set_read_timeout(options.read_timeout)?;
        stream.set_write_timeout(options.write_timeout)?;
        Ok(TcpTransport {
            stream: Some(stream),
            options,
        })
    }

    /// Obtain the options in use.
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Obtain access to the inner TCP stream, if connected.
    pub fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    fn connect(&self, address: &str) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in address.to_socket_addrs()? {
            let outcome = match self.options.connection_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match outcome {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Could not connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                "address did not resolve to any socket address",
            )
        }))
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, address: &str) -> io::Result<()> {
        if self.stream.is_some() {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                "transport is already open",
            ));
        }
        let stream = self.connect(address)?;
        stream.set_read_timeout(self.options.read_timeout)?;
        stream.set_write_timeout(self.options.write_timeout)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                // the peer may have closed first
                Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
                out => out,
            },
            None => Ok(()),
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream
            .as_ref()
            .ok_or_else(not_connected)?
            .set_read_timeout(timeout)
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.as_mut().ok_or_else(not_connected)?.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.as_mut().ok_or_else(not_connected)?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.as_mut().ok_or_else(not_connected)?.flush()
    }
}
