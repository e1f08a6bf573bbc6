use anyhow::{Context, Result};
use dosekeeper::prelude::*;
use dosekeeper::sim::placeholder_devices;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the schedule. Without a path, the built-in three-dose day is used.
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => DispenserConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            info!("No configuration file given; using the default schedule.");
            DispenserConfig::default()
        }
    };
    for slot in config.dose_slots()? {
        info!(
            "Scheduled '{}' at {} ({}), grace {}s, missed after {}s.",
            slot.id,
            slot.time.format("%H:%M"),
            config.timezone,
            slot.grace_window.num_seconds(),
            slot.missed_threshold.num_seconds()
        );
    }

    // 3. Create the engine with placeholder devices.
    let mut engine = DispenserEngine::new(&config, SystemClock, placeholder_devices())?;

    // 4. Log every dose event as it happens.
    spawn_event_listeners(&engine);

    // 5. Run until Ctrl+C.
    engine.run().await?;
    info!("Exiting {} {}.", dosekeeper::ENGINE_NAME, dosekeeper::VERSION);
    Ok(())
}

/// Spawns tasks that log the engine's event streams.
fn spawn_event_listeners<C, V, A, S, N>(engine: &DispenserEngine<C, V, A, S, N>) {
    let mut system_rx = engine.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            if !matches!(event, SystemEvent::CycleCompleted { requests_served: 0, .. }) {
                info!("[SYSTEM] => {:?}", event);
            }
        }
    });

    let mut dose_rx = engine.subscribe_dose_events();
    tokio::spawn(async move {
        while let Ok(event) = dose_rx.recv().await {
            match event {
                DoseEvent::StateChanged(t) => info!("[DOSE] {} {} -> {}", t.dose, t.from, t.to),
                other => info!("[DOSE] => {:?}", other),
            }
        }
    });
}
