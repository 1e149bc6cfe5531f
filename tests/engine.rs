/// End-to-end runs of the engine against loopback sinks.
use std::{
    io::Read,
    net::{SocketAddr, TcpListener},
    thread,
    time::Duration,
};

use surge::{Command, Engine, EngineOptions, Payload};

/// Accepts every connection and drains it until the peer goes away.
fn spawn_sink() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind sink");
    let addr = listener.local_addr().expect("sink address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            thread::spawn(move || {
                let mut buf = [0u8; 16 * 1024];
                while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

fn engine(addresses: Vec<SocketAddr>, workers: usize) -> Engine {
    Engine::start(
        addresses,
        Payload::new("abc").expect("payload"),
        EngineOptions {
            workers: Some(workers),
            ..EngineOptions::default()
        },
    )
    .expect("engine should start")
}

#[test]
fn every_connect_command_is_dialed_exactly_once() {
    let sink = spawn_sink();
    let engine = engine(vec![sink], 4);

    engine.commands().open_connections(40).expect("queue commands");
    thread::sleep(Duration::from_millis(200));

    let reports = engine.shutdown().expect("shutdown");
    assert_eq!(reports.len(), 4);

    let attempts: u64 = reports.iter().map(|r| r.connection_attempts()).sum();
    assert_eq!(attempts, 40);
    assert!(reports.iter().all(|r| r.open_connections == 0));
    assert!(reports.iter().all(|r| r.connection_failures() == 0));
    assert!(reports.iter().map(|r| r.total_data_transmitted).sum::<u64>() > 0);
}

#[test]
fn single_burst_is_shared_between_workers() {
    let sink = spawn_sink();
    let engine = engine(vec![sink], 4);

    engine.commands().open_connections(200).expect("queue commands");
    thread::sleep(Duration::from_millis(300));

    let reports = engine.shutdown().expect("shutdown");
    let per_worker: Vec<u64> = reports.iter().map(|r| r.connection_attempts()).collect();
    assert_eq!(per_worker.iter().sum::<u64>(), 200);
    assert!(
        per_worker.iter().filter(|attempts| **attempts > 0).count() > 1,
        "one worker took the whole burst: {per_worker:?}"
    );
}

#[test]
fn commands_spread_over_every_address() {
    let sinks = vec![spawn_sink(), spawn_sink(), spawn_sink()];
    let engine = engine(sinks, 1);

    for _ in 0..6 {
        engine.commands().send(Command::Connect).expect("queue command");
    }
    thread::sleep(Duration::from_millis(100));

    let reports = engine.shutdown().expect("shutdown");
    let remotes = &reports[0].remotes;
    assert_eq!(remotes.len(), 3);
    assert!(remotes.iter().all(|r| r.connection_attempts == 2));
}

#[test]
fn unreachable_address_keeps_being_chosen() {
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("address")
    };
    let engine = engine(vec![dead], 1);

    engine.commands().open_connections(11).expect("queue commands");
    thread::sleep(Duration::from_millis(500));

    let reports = engine.shutdown().expect("shutdown");
    let stats = reports[0].remotes[0];
    assert_eq!(stats.connection_attempts, 11);
    assert_eq!(stats.connection_failures, 11);
    assert!(stats.is_broken());
}

#[test]
fn unknown_bytes_are_ignored() {
    let sink = spawn_sink();
    let engine = engine(vec![sink], 2);

    engine.commands().send_raw(b'?').expect("queue junk");
    engine.commands().open_connection().expect("queue command");
    thread::sleep(Duration::from_millis(100));

    let reports = engine.shutdown().expect("shutdown");
    let attempts: u64 = reports.iter().map(|r| r.connection_attempts()).sum();
    assert_eq!(attempts, 1);
}
