//! Multi-core TCP traffic engine.
//!
//! ```text
//!            CommandChannel (write end)
//!                     |
//!                +---------+
//!                |  pipe   |   one byte = one command
//!                +---------+
//!               /     |     \
//!        worker 0  worker 1  worker N-1     (one mio::Poll per thread)
//!           |         |         |
//!       connections connections connections
//! ```
//!
//! Every worker registers the same read end, so a `'c'` is picked up by
//! whichever reactor gets to it first. That keeps dialing spread across
//! cores without a dispatcher.

pub mod connection;
pub mod control;
pub mod payload;
pub mod roster;
pub mod worker;

use std::{net::SocketAddr, sync::Arc, thread};

pub use connection::{Connection, ConnectionState};
pub use control::{Command, CommandChannel};
pub use payload::Payload;
pub use roster::{BROKEN_ATTEMPTS_THRESHOLD, RemoteStats, Roster};
pub use worker::{DEFAULT_MAX_EVENTS, Worker, WorkerReport, WorkerSetup};

use crate::{error::EngineError, logging::SurgeLogger, sys};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker count, `None` uses every CPU available to the process.
    pub workers: Option<usize>,
    /// Pin worker `i` to core `i` when there are enough cores.
    pub pin_workers: bool,
    pub max_events: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: None,
            pin_workers: false,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

pub struct Engine {
    commands: CommandChannel,
    workers: Vec<thread::JoinHandle<WorkerReport>>,
}

/// Starts one worker per available CPU with default options.
pub fn start_engine(addresses: Vec<SocketAddr>, payload: Payload) -> Result<Engine, EngineError> {
    Engine::start(addresses, payload, EngineOptions::default())
}

impl Engine {
    pub fn start(
        addresses: Vec<SocketAddr>,
        payload: Payload,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        if addresses.is_empty() {
            return Err(EngineError::EmptyRoster);
        }
        let addresses: Arc<[SocketAddr]> = Arc::from(addresses);

        let cpus = sys::available_cpus();
        let count = options.workers.filter(|n| *n > 0).unwrap_or(cpus);
        SurgeLogger::using_cpus(count);

        let (control, commands) =
            control::control_pipe().map_err(EngineError::ControlChannel)?;

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let setup = WorkerSetup {
                index,
                addresses: Arc::clone(&addresses),
                payload: payload.clone(),
                control: Arc::clone(&control),
                max_events: options.max_events,
            };
            let core = (options.pin_workers && count <= cpus).then_some(index);

            match Worker::new(setup).and_then(|worker| spawn_worker(index, worker, core)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    let _ = commands.terminate_many(workers.len());
                    return Err(err);
                }
            }
        }

        Ok(Self { commands, workers })
    }

    pub fn commands(&self) -> &CommandChannel {
        &self.commands
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues one terminate token per worker and waits for all of them.
    ///
    /// Workers exit once every connection they own has been reaped, which
    /// happens at each connection's next writability.
    pub fn shutdown(mut self) -> Result<Vec<WorkerReport>, EngineError> {
        let handles = std::mem::take(&mut self.workers);
        self.commands
            .terminate_many(handles.len())
            .map_err(EngineError::ControlChannel)?;

        let mut reports = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            let report = handle
                .join()
                .map_err(|_| EngineError::WorkerPanicked { index })?;
            reports.push(report);
        }

        SurgeLogger::engine_summary(
            reports.len(),
            reports.iter().map(WorkerReport::connection_attempts).sum(),
            reports.iter().map(WorkerReport::connection_failures).sum(),
            reports.iter().map(|r| r.total_data_transmitted).sum(),
        );
        Ok(reports)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let _ = self.commands.terminate_many(self.workers.len());
        }
    }
}

fn spawn_worker(
    index: usize,
    worker: Worker,
    core: Option<usize>,
) -> Result<thread::JoinHandle<WorkerReport>, EngineError> {
    thread::Builder::new()
        .name(format!("surge-worker-{index}"))
        .spawn(move || {
            if let Some(core) = core {
                match sys::pin_to_core(core) {
                    Ok(()) => SurgeLogger::pinned(core),
                    Err(err) => SurgeLogger::pin_failed(core, &err),
                }
            }
            worker.run()
        })
        .map_err(|source| EngineError::Spawn { index, source })
}
