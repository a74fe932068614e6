//! Timer-driven metric sampling
//!
//! Once per interval the sampler asks its [`MetricSource`] for the system,
//! disk and cpu sections, renders them into a single payload and hands it
//! to [`BroadcastServer::tick`]. If any section fails the whole tick is
//! skipped; the next attempt happens after the normal interval.

pub mod host;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::MissedTickBehavior;

use crate::error::MetricError;
use crate::server::BroadcastServer;

pub use host::HostMetrics;

/// Producer of the rendered metric sections
pub trait MetricSource: Send {
    fn system_section(&mut self) -> Result<String, MetricError>;
    fn disk_section(&mut self) -> Result<String, MetricError>;
    fn cpu_section(&mut self) -> Result<String, MetricError>;
}

/// Shortest accepted sampling interval
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between ticks
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

impl SamplerConfig {
    /// Set the sampling interval (at least [`MIN_INTERVAL`])
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }
}

/// Tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Ticks attempted
    pub ticks: u64,
    /// Ticks skipped because a section failed
    pub skipped: u64,
}

/// Drives a [`MetricSource`] on a fixed interval
pub struct Sampler<S: MetricSource> {
    source: S,
    config: SamplerConfig,
    stats: SamplerStats,
}

impl<S: MetricSource> Sampler<S> {
    pub fn new(source: S, config: SamplerConfig) -> Self {
        Self {
            source,
            config,
            stats: SamplerStats::default(),
        }
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Collect all three sections and render one payload
    pub fn sample(&mut self) -> Result<Bytes, MetricError> {
        let system = self.source.system_section()?;
        let disk = self.source.disk_section()?;
        let cpu = self.source.cpu_section()?;

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        Ok(render(&timestamp, &system, &disk, &cpu))
    }

    /// Run one sampling cycle
    ///
    /// Returns whether a payload was broadcast.
    pub async fn tick(&mut self, server: &BroadcastServer) -> bool {
        self.stats.ticks += 1;

        match self.sample() {
            Ok(payload) => {
                server.tick(payload).await;
                true
            }
            Err(e) => {
                self.stats.skipped += 1;
                tracing::warn!(
                    error = %e,
                    tick = self.stats.ticks,
                    "Sampling failed, skipping tick"
                );
                false
            }
        }
    }

    /// Sample forever
    pub async fn run(mut self, server: Arc<BroadcastServer>) {
        // The field is public, so it may have bypassed the builder clamp
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        // A blocked broadcast must not cause a burst of catch-up ticks
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = period.as_millis() as u64,
            "Sampler started"
        );

        loop {
            ticker.tick().await;
            self.tick(&server).await;
        }
    }

    /// Spawn the sampling loop
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn(self, server: &Arc<BroadcastServer>) -> tokio::task::JoinHandle<()>
    where
        S: 'static,
    {
        tokio::spawn(self.run(Arc::clone(server)))
    }
}

/// Render the sections as out-of-band swap fragments
pub fn render(timestamp: &str, system: &str, disk: &str, cpu: &str) -> Bytes {
    let html = format!(
        concat!(
            "<div hx-swap-oob=\"innerHTML:#update-timestamp\">{}</div>\n",
            "<div hx-swap-oob=\"innerHTML:#system-data\">{}</div>\n",
            "<div hx-swap-oob=\"innerHTML:#disk-data\">{}</div>\n",
            "<div hx-swap-oob=\"innerHTML:#cpu-data\">{}</div>\n",
        ),
        timestamp, system, disk, cpu
    );
    Bytes::from(html)
}
