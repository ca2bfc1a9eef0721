//! Fetch, derive, encode and write cycle.
//!
//! The [`Poller`] is the single writer of a [`RegisterStore`]. Each cycle
//! fetches one [`TelemetrySnapshot`] from a [`TelemetrySource`], derives the
//! meter quantities and writes all dynamic registers in one locked update. A
//! failed fetch leaves the store untouched, so the Modbus side keeps serving
//! the last good reading.

use crate::{
    error::{Error, Result},
    register_map::RegisterMap,
    register_store::RegisterStore,
    telemetry::{self, StatusSummary, TelemetrySnapshot},
};
use async_trait::async_trait;
use log::*;
use std::{sync::Arc, time::Duration};
use tokio::time::{self, MissedTickBehavior};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_ALERT_THRESHOLD: u32 = 10;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Anything able to produce one meter reading.
#[async_trait]
pub trait TelemetrySource: Send {
    async fn fetch(&mut self) -> Result<TelemetrySnapshot>;
}

/// Result of a single [`Poller::poll_once`] cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The reading was written to the store.
    Applied(StatusSummary),
    /// The fetch or the encoding failed and the store was left as is.
    Skipped {
        consecutive_failures: u32,
        /// `true` when this failure crossed the alert threshold.
        alerted: bool,
    },
}

pub struct Poller<S> {
    source: S,
    store: Arc<RegisterStore>,
    map: RegisterMap,
    interval: Duration,
    fetch_timeout: Duration,
    alert_threshold: u32,
    consecutive_failures: u32,
}

impl<S: TelemetrySource> Poller<S> {
    /// Creates a poller writing `map`'s fields into `store`, relative to the
    /// store's base offset.
    pub fn new(source: S, store: Arc<RegisterStore>, map: RegisterMap) -> Self {
        Self {
            source,
            store,
            map,
            interval: DEFAULT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            consecutive_failures: 0,
        }
    }

    /// A zero interval is raised to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// A threshold of `0` is treated as `1`.
    pub fn with_alert_threshold(mut self, alert_threshold: u32) -> Self {
        self.alert_threshold = alert_threshold.max(1);
        self
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Fetches one snapshot, bounded by the fetch timeout.
    pub async fn fetch(&mut self) -> Result<TelemetrySnapshot> {
        match time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.fetch_timeout)),
        }
    }

    /// Derives and writes `snapshot`. The store lock is held for the register
    /// copy only.
    pub fn apply(&self, snapshot: &TelemetrySnapshot) -> Result<StatusSummary> {
        let derived = telemetry::derive(snapshot);
        let updates = self.map.encode(self.store.base_offset(), &derived)?;
        trace!("Writing {} register fields", updates.len());
        self.store.apply(&updates);
        Ok(StatusSummary::new(snapshot, &derived))
    }

    /// Runs one cycle.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let applied = match self.fetch().await {
            Ok(snapshot) => self.apply(&snapshot),
            Err(err) => Err(err),
        };
        match applied {
            Ok(summary) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Meter data back after {} failed polls",
                        self.consecutive_failures
                    );
                    self.consecutive_failures = 0;
                }
                info!("{summary}");
                PollOutcome::Applied(summary)
            }
            Err(err) => {
                self.consecutive_failures += 1;
                let consecutive_failures = self.consecutive_failures;
                warn!(
                    "Poll failed ({consecutive_failures}/{}), keeping last values: {err}",
                    self.alert_threshold
                );
                let alerted = consecutive_failures >= self.alert_threshold;
                if alerted {
                    error!(
                        "No meter data for {consecutive_failures} consecutive polls, the inverter sees stale values"
                    );
                    self.consecutive_failures = 0;
                }
                PollOutcome::Skipped {
                    consecutive_failures,
                    alerted,
                }
            }
        }
    }

    /// Polls forever at the configured interval. A slow cycle delays the
    /// following ticks instead of bursting to catch up.
    pub async fn run(mut self) {
        info!(
            "Polling every {:?} (fetch timeout {:?})",
            self.interval, self.fetch_timeout
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }
}
