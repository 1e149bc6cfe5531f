mod utils;

use std::{
    error::Error,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::anyhow;
use surge::{
    Engine, Payload,
    config::{ConfigLoadError, SurgeConfig},
};
use tokio::sync::broadcast;

fn config_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = dotenvy::var("SURGE_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(std::env::current_dir()?.join("settings.toml"))
}

fn load_config(path: &Path) -> anyhow::Result<SurgeConfig> {
    match SurgeConfig::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::Io(_)) => {
            // If config loading fails we generate a default config
            let default_config = SurgeConfig::default();
            match default_config.save(path) {
                Ok(()) => log::info!("Wrote default configuration to {}", path.display()),
                Err(err) => log::warn!(
                    "Could not write default configuration to {}: {err}",
                    path.display()
                ),
            }
            Ok(default_config)
        }
        Err(ConfigLoadError::Parse(err)) => {
            Err(anyhow!("could not parse {}: {err}", path.display()))
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SignalAction {
    /// Stop issuing commands and shut the engine down.
    Stop,
    /// Shutdown is stuck, leave now.
    Exit,
}

fn signal_action(received: usize) -> SignalAction {
    if received <= 1 {
        SignalAction::Stop
    } else {
        SignalAction::Exit
    }
}

/// First SIGINT/SIGTERM stops the load, a second one exits right away.
async fn watch_signals(stop: broadcast::Sender<()>) -> anyhow::Result<()> {
    use futures::future::{FutureExt, select_all};
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let mut received = 0;
    loop {
        let sigint_fut = sigint.recv().boxed();
        let sigterm_fut = sigterm.recv().boxed();

        let _ = select_all([sigint_fut, sigterm_fut]).await;
        received += 1;
        match signal_action(received) {
            SignalAction::Stop => {
                log::info!("Received signal, stopping...");
                let _ = stop.send(());
            }
            SignalAction::Exit => {
                log::warn!("Received another signal, exiting without draining");
                std::process::exit(1);
            }
        }
    }
}

/// Issues connect commands at the configured pace, then holds the load.
async fn drive_load(
    engine: &Engine,
    config: &SurgeConfig,
    mut stop: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let load = &config.load;
    let commands = engine.commands();

    if load.connect_rate == 0 {
        commands.open_connections(load.connections as usize)?;
    } else {
        let period = Duration::from_secs_f64(1.0 / load.connect_rate as f64);
        let mut ticker = tokio::time::interval(period);
        for _ in 0..load.connections {
            tokio::select! {
                _ = ticker.tick() => commands.open_connection()?,
                _ = stop.recv() => return Ok(()),
            }
        }
    }
    log::info!("Requested {} connections", load.connections);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(load.duration)) => {}
        _ = stop.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    #[cfg(debug_assertions)]
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .init();
    #[cfg(not(debug_assertions))]
    env_logger::init();

    let config = load_config(&config_path()?)?;
    let addresses = config.addresses()?;
    let payload = Payload::new(config.message.clone().into_bytes())?;
    let engine = Engine::start(addresses, payload, config.engine_options())?;

    let stop = broadcast::channel(1).0;
    let signals = tokio::spawn(watch_signals(stop.clone()));

    drive_load(&engine, &config, stop.subscribe()).await?;

    // The signal task stays alive so a second signal can cut a stuck drain.
    let reports = tokio::task::spawn_blocking(move || engine.shutdown()).await??;
    signals.abort();
    let transmitted: u64 = reports.iter().map(|r| r.total_data_transmitted).sum();
    log::info!(
        "Transmitted {} bytes over {} workers",
        transmitted,
        reports.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SignalAction, load_config, signal_action};

    #[test]
    fn second_signal_exits() {
        assert_eq!(signal_action(1), SignalAction::Stop);
        assert_eq!(signal_action(2), SignalAction::Exit);
        assert_eq!(signal_action(3), SignalAction::Exit);
    }

    #[test]
    fn missing_config_is_written_once() {
        let path = std::env::temp_dir().join(format!("surge-main-{}.toml", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let config = load_config(&path).unwrap();
        assert_eq!(config.message, "abc");
        assert!(path.exists());

        let reloaded = load_config(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(reloaded.targets, config.targets);
    }

    #[test]
    fn unwritable_default_still_loads() {
        let path = std::env::temp_dir()
            .join(format!("surge-missing-dir-{}", std::process::id()))
            .join("settings.toml");

        let config = load_config(&path).unwrap();
        assert_eq!(config.message, "abc");
        assert!(!path.exists());
    }
}
