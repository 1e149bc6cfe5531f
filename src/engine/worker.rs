//! Reactor thread driving a disjoint set of outbound connections.
//!
//! Each worker owns a `mio::Poll`, its connections and its private view of
//! the roster health. The only thing it shares with other workers is the
//! read end of the control pipe: every worker registers it, and whoever
//! reads a byte first acts on it.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, ErrorKind, Read},
    net::SocketAddr,
    os::fd::AsRawFd,
    sync::Arc,
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::TcpStream, unix::SourceFd};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::{
    connection::Connection,
    control::Command,
    payload::Payload,
    roster::{RemoteStats, Roster},
};
use crate::{
    error::{DialError, EngineError},
    logging::SurgeLogger,
    sys,
};

const CONTROL_TOKEN: Token = Token(0);

const CONNECTION_TOKEN_START: usize = 1;

pub const DEFAULT_MAX_EVENTS: usize = 1024;

pub struct WorkerSetup {
    pub index: usize,
    pub addresses: Arc<[SocketAddr]>,
    pub payload: Payload,
    pub control: Arc<File>,
    pub max_events: usize,
}

/// What a worker leaves behind when its reactor exits.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker: usize,
    pub open_connections: usize,
    /// Bytes sent by connections that closed on this worker.
    pub total_data_transmitted: u64,
    pub remotes: Vec<RemoteStats>,
}

impl WorkerReport {
    pub fn connection_attempts(&self) -> u64 {
        self.remotes.iter().map(|r| r.connection_attempts).sum()
    }

    pub fn connection_failures(&self) -> u64 {
        self.remotes.iter().map(|r| r.connection_failures).sum()
    }
}

enum WriteOutcome {
    /// Socket buffer full or connect still pending.
    Blocked,
    /// Still writable, gets another write next turn.
    Pending,
    Closed,
}

pub struct Worker {
    index: usize,
    poll: Poll,
    control: Arc<File>,
    control_registered: bool,
    /// Control pipe readable, not yet drained down to `WouldBlock`.
    control_ready: bool,
    payload: Payload,
    roster: Roster,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    ready: Vec<Token>,
    spare: Vec<Token>,
    max_events: usize,
    total_data_transmitted: u64,
    open_connections: usize,
    terminating: bool,
}

impl Worker {
    pub fn new(setup: WorkerSetup) -> Result<Self, EngineError> {
        let poll = Poll::new().map_err(EngineError::Poll)?;
        let roster = Roster::new(setup.addresses, setup.index)?;

        let control_fd = setup.control.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&control_fd), CONTROL_TOKEN, Interest::READABLE)
            .map_err(EngineError::Poll)?;

        Ok(Self {
            index: setup.index,
            poll,
            control: setup.control,
            control_registered: true,
            control_ready: false,
            payload: setup.payload,
            roster,
            connections: HashMap::new(),
            next_token: CONNECTION_TOKEN_START,
            ready: Vec::new(),
            spare: Vec::new(),
            max_events: setup.max_events.max(1),
            total_data_transmitted: 0,
            open_connections: 0,
            terminating: false,
        })
    }

    /// Runs the reactor until the worker is told to stop and owns no
    /// connection anymore.
    pub fn run(mut self) -> WorkerReport {
        let mut events = Events::with_capacity(self.max_events);
        while !self.is_finished() {
            if let Err(err) = self.turn(&mut events, None) {
                SurgeLogger::poll_failed(self.index, &err);
                break;
            }
        }
        let report = self.report();
        SurgeLogger::worker_exit(&report);
        report
    }

    /// One poll, at most one control byte, and one write for every
    /// connection that is ready.
    ///
    /// Reading a single control byte per turn leaves the rest of a burst to
    /// the other reactors woken by the same readiness edge.
    pub(crate) fn turn(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let timeout = if self.ready.is_empty() && !self.control_ready {
            timeout
        } else {
            Some(Duration::ZERO)
        };

        match self.poll.poll(events, timeout) {
            Ok(()) => {
                for event in events.iter() {
                    match event.token() {
                        CONTROL_TOKEN => self.control_ready = self.control_registered,
                        token => self.mark_ready(token),
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }

        self.read_control();
        self.service_ready();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.terminating && self.connections.is_empty()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections
    }

    pub fn total_data_transmitted(&self) -> u64 {
        self.total_data_transmitted
    }

    /// Bytes sent by connections that are still open.
    pub fn live_data_transmitted(&self) -> u64 {
        self.connections.values().map(|c| c.data_transmitted()).sum()
    }

    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            worker: self.index,
            open_connections: self.open_connections,
            total_data_transmitted: self.total_data_transmitted,
            remotes: self.roster.snapshot(),
        }
    }

    fn read_control(&mut self) {
        if !self.control_ready || self.terminating {
            return;
        }
        let mut byte = [0u8; 1];
        let read = (&*self.control).read(&mut byte);
        match read {
            Ok(0) => {
                SurgeLogger::control_closed(self.index);
                self.control_ready = false;
            }
            Ok(_) => {
                if let Err(err) = self.handle_command(Command::from(byte[0])) {
                    abort_on(err);
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => self.control_ready = false,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                SurgeLogger::control_read_failed(self.index, &err);
                self.control_ready = false;
            }
        }
    }

    pub(crate) fn handle_command(&mut self, command: Command) -> Result<(), DialError> {
        match command {
            Command::Connect => self.start_new_connection(),
            Command::Terminate => {
                self.begin_terminating();
                Ok(())
            }
            Command::Unknown(byte) => {
                SurgeLogger::unknown_command(self.index, byte);
                Ok(())
            }
        }
    }

    fn begin_terminating(&mut self) {
        self.terminating = true;
        self.control_ready = false;
        if self.control_registered {
            let control_fd = self.control.as_raw_fd();
            let _ = self.poll.registry().deregister(&mut SourceFd(&control_fd));
            self.control_registered = false;
        }
    }

    fn start_new_connection(&mut self) -> Result<(), DialError> {
        let index = self.roster.select_next();
        let remote = self.roster.address(index);
        self.roster.stats_mut(index).connection_attempts += 1;

        let socket = match Socket::new(Domain::for_address(remote), Type::STREAM, Some(Protocol::TCP)) {
            Ok(socket) => socket,
            Err(err) => {
                let err = DialError::classify(err)?;
                SurgeLogger::socket_failed(&err);
                return Ok(());
            }
        };
        if let Err(err) = socket.set_nonblocking(true) {
            SurgeLogger::socket_failed(&err);
            return Ok(());
        }

        match socket.connect(&SockAddr::from(remote)) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(err) => {
                if self.roster.stats_mut(index).record_failure() {
                    SurgeLogger::connect_failed(&remote, &err);
                }
                return Ok(());
            }
        }

        let token = Token(self.next_token);
        self.next_token += 1;

        let mut stream = TcpStream::from_std(socket.into());
        if let Err(err) = self
            .poll
            .registry()
            .register(&mut stream, token, Interest::WRITABLE)
        {
            SurgeLogger::register_failed(&remote, &err);
            return Ok(());
        }

        self.connections
            .insert(token, Connection::new(stream, remote, index));
        self.open_connections += 1;
        Ok(())
    }

    fn mark_ready(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            if !conn.ready {
                conn.ready = true;
                self.ready.push(token);
            }
        }
    }

    fn service_ready(&mut self) {
        let mut batch = std::mem::take(&mut self.spare);
        std::mem::swap(&mut batch, &mut self.ready);

        for token in batch.drain(..) {
            match self.on_writable(token) {
                WriteOutcome::Pending => self.ready.push(token),
                WriteOutcome::Blocked => {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.ready = false;
                    }
                }
                WriteOutcome::Closed => {}
            }
        }

        self.spare = batch;
    }

    fn on_writable(&mut self, token: Token) -> WriteOutcome {
        if self.terminating {
            self.close_connection(token);
            return WriteOutcome::Closed;
        }

        let Some(conn) = self.connections.get_mut(&token) else {
            return WriteOutcome::Closed;
        };

        match conn.finish_connect() {
            Ok(true) => {}
            Ok(false) => return WriteOutcome::Blocked,
            Err(err) => {
                let remote = conn.remote();
                if self.roster.stats_mut(conn.roster_index).record_failure() {
                    SurgeLogger::connect_failed(&remote, &err);
                }
                self.close_connection(token);
                return WriteOutcome::Closed;
            }
        }

        let chunk = self.payload.largest_contiguous_chunk(&mut conn.write_offset);
        match conn.write_chunk(chunk) {
            Ok(written) => {
                conn.record_write(written);
                WriteOutcome::Pending
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => WriteOutcome::Blocked,
            Err(err) if err.kind() == ErrorKind::Interrupted => WriteOutcome::Pending,
            Err(err) => {
                let remote = conn.remote();
                let stats = self.roster.stats_mut(conn.roster_index);
                if err.kind() == ErrorKind::BrokenPipe {
                    SurgeLogger::connection_closed_by(&remote);
                } else if stats.claim_write_report() {
                    SurgeLogger::write_failed(&remote, &err);
                }
                stats.record_failure();
                self.close_connection(token);
                WriteOutcome::Closed
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.total_data_transmitted += conn.data_transmitted();
            self.open_connections = self.open_connections.saturating_sub(1);
        }
    }
}

fn abort_on(err: DialError) -> ! {
    SurgeLogger::descriptors_exhausted(sys::max_open_files(), &err);
    std::process::exit(1);
}
