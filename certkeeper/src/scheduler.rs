//! Scheduling loop for the `run` command
//!
//! One batch right away, then one per `check_interval`. Shutdown is only
//! observed between batches; a running batch always finishes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::{ConfigError, MainConfig};
use crate::reload::Reloader;
use crate::renewal::{BatchOptions, RenewalEngine};

/// Interval timer plus the shutdown flag it is raced against
pub struct SchedulingLoop {
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SchedulingLoop {
    pub fn new(interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self { interval, shutdown }
    }

    /// Drive `tick` until shutdown. Each call returns the interval to use
    /// from then on, or `None` to keep the current one.
    pub async fn run<F, Fut>(mut self, mut tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<Duration>>,
    {
        let next = tick().await;
        self.adopt(next);
        let mut timer = start_timer(self.interval).await;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Shutdown channel closed, stopping");
                        break;
                    }
                    continue;
                }
                _ = timer.tick() => {}
            }

            let next = tick().await;
            if self.adopt(next) {
                timer = start_timer(self.interval).await;
            }
        }

        tracing::info!("Scheduling loop stopped");
    }

    /// Switch to a new interval; true when it changed.
    fn adopt(&mut self, next: Option<Duration>) -> bool {
        match next {
            Some(interval) if interval != self.interval && !interval.is_zero() => {
                tracing::info!(
                    interval = %humantime::format_duration(interval),
                    "Check interval changed"
                );
                self.interval = interval;
                true
            }
            _ => false,
        }
    }
}

async fn start_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    timer.tick().await;
    timer
}

/// Flip the returned receiver to `true` on Ctrl-C or SIGTERM.
pub fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down after the current batch");
                let _ = shutdown_tx.send(true);
            }
        });
    }
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::spawn(async move {
                    let _ = sigterm.recv().await;
                    tracing::info!("SIGTERM received, shutting down after the current batch");
                    let _ = shutdown_tx.send(true);
                });
            }
            Err(e) => tracing::warn!("Failed to listen for SIGTERM: {}", e),
        }
    }

    shutdown_rx
}

/// Continuous mode: re-read the configuration before every batch.
///
/// Only the first load is fatal. Later failures skip that tick.
pub async fn run_continuously(
    config_path: PathBuf,
    options: BatchOptions,
    reloader: Arc<dyn Reloader>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ConfigError> {
    let config = MainConfig::load_from_file(&config_path)?;
    tracing::info!(
        config = %config_path.display(),
        interval = %humantime::format_duration(config.check_interval),
        "Starting certificate renewal loop"
    );

    let interval = config.check_interval;
    let mut preloaded = Some(config);
    SchedulingLoop::new(interval, shutdown)
        .run(|| {
            let preloaded = preloaded.take();
            let config_path = config_path.clone();
            let reloader = reloader.clone();
            async move { run_tick(preloaded, &config_path, options, reloader).await }
        })
        .await;

    Ok(())
}

async fn run_tick(
    preloaded: Option<MainConfig>,
    config_path: &Path,
    options: BatchOptions,
    reloader: Arc<dyn Reloader>,
) -> Option<Duration> {
    let config = match preloaded {
        Some(config) => config,
        None => match MainConfig::load_from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to load configuration, skipping this check: {}", e);
                return None;
            }
        },
    };

    let engine = match RenewalEngine::from_config(&config, reloader) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to set up renewal engine: {}", e);
            return Some(config.check_interval);
        }
    };

    match config.load_descriptors() {
        Ok(set) => {
            engine.run_set(set, options).await;
        }
        Err(e) => tracing::error!("Failed to resolve certificate configurations: {}", e),
    }

    Some(config.check_interval)
}
