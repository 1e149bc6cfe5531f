use std::{fmt::Display, net::SocketAddr};

use log::{debug, error, info, warn};

use crate::engine::WorkerReport;

pub struct SurgeLogger;

impl SurgeLogger {
    pub fn using_cpus(count: usize) {
        info!("Using {} available CPUs", count);
    }

    pub fn pin_failed(core: usize, err: &std::io::Error) {
        warn!("Failed to pin worker to core {}: {}", core, err);
    }

    pub fn pinned(core: usize) {
        debug!("Pinned worker to core {}", core);
    }

    pub fn socket_failed(err: &std::io::Error) {
        debug!("Could not create socket, dropping connect request: {err}");
    }

    pub fn connect_failed(addr: &SocketAddr, err: &dyn Display) {
        warn!("Connection to {addr} is not done: {err}");
    }

    pub fn register_failed(addr: &SocketAddr, err: &std::io::Error) {
        warn!("Could not register connection to {addr}: {err}");
    }

    pub fn connection_closed_by(addr: &SocketAddr) {
        warn!("Connection closed by {addr}");
    }

    pub fn write_failed(addr: &SocketAddr, err: &std::io::Error) {
        warn!("Write to {addr} failed, closing: {err}");
    }

    pub fn control_read_failed(worker: usize, err: &std::io::Error) {
        warn!("{worker} Reading from control channel failed: {err}");
    }

    pub fn control_closed(worker: usize) {
        warn!("{worker} Control channel closed");
    }

    pub fn unknown_command(worker: usize, byte: u8) {
        warn!(
            "{worker} Unknown operation '{}' from control channel",
            byte.escape_ascii()
        );
    }

    pub fn poll_failed(worker: usize, err: &std::io::Error) {
        error!("{worker} Reactor poll failed: {err}");
    }

    pub fn descriptors_exhausted(limit: i64, err: &dyn Display) {
        error!("System socket table is full ({err}), limit is {limit}; consider raising ulimit -n");
    }

    pub fn worker_exit(report: &WorkerReport) {
        info!(
            "Exiting cpu thread {}: {} open_connections, {} total_data_transmitted",
            report.worker, report.open_connections, report.total_data_transmitted
        );
    }

    pub fn engine_summary(workers: usize, attempts: u64, failures: u64, transmitted: u64) {
        info!(
            "Engine stopped: {workers} workers, {attempts} connection attempts, {failures} failures, {transmitted} bytes transmitted"
        );
    }
}
