use std::{
    io::{self, ErrorKind, Write},
    net::SocketAddr,
};

use mio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Non-blocking connect issued, not confirmed yet.
    Connecting,
    Established,
}

/// One outbound socket owned by a single worker.
#[derive(Debug)]
pub struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) remote: SocketAddr,
    pub(crate) roster_index: usize,
    pub(crate) state: ConnectionState,
    /// Cursor into the payload, always below its length after a chunk lookup.
    pub(crate) write_offset: usize,
    pub(crate) data_transmitted: u64,
    /// Writable readiness not yet consumed by a `WouldBlock`.
    pub(crate) ready: bool,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, remote: SocketAddr, roster_index: usize) -> Self {
        Self {
            stream,
            remote,
            roster_index,
            state: ConnectionState::Connecting,
            write_offset: 0,
            data_transmitted: 0,
            ready: false,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn data_transmitted(&self) -> u64 {
        self.data_transmitted
    }

    /// Checks whether a pending connect has completed.
    ///
    /// `Ok(false)` means the wakeup was spurious and the socket is still
    /// connecting.
    pub(crate) fn finish_connect(&mut self) -> io::Result<bool> {
        if self.state == ConnectionState::Established {
            return Ok(true);
        }
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.state = ConnectionState::Established;
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(false),
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<usize> {
        self.stream.write(chunk)
    }

    pub(crate) fn record_write(&mut self, written: usize) {
        self.write_offset += written;
        self.data_transmitted += written as u64;
    }
}
