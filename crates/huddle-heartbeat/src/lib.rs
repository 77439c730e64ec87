//! Fixed-interval keep-alive scheduler for Huddle.
//!
//! A signaling relay (or a proxy in front of it) drops control channels
//! that stay idle for too long. The channel therefore sends a `pingPong`
//! frame on a fixed interval, 10 seconds by default, for as long as it is
//! open. This crate decides *when*; the channel decides *what* to send.
//!
//! # Disabled mode
//!
//! When `interval` is zero, [`Heartbeat::wait_for_beat`] pends forever.
//! The same happens after [`Heartbeat::stop`].
//!
//! # Integration
//!
//! ```ignore
//! let mut heartbeat = Heartbeat::new(HeartbeatConfig::default());
//! loop {
//!     heartbeat.wait_for_beat().await;
//!     if outbound.send(SignalMessage::ping()).is_err() {
//!         break;
//!     }
//! }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the keep-alive scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between beats. Zero disables the heartbeat.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::every(Self::DEFAULT_INTERVAL)
    }
}

impl HeartbeatConfig {
    /// Interval the relay expects between keep-alives.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    /// Shortest interval accepted; anything below is raised to this.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Creates a config for a specific interval.
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }

    /// Creates a config that never beats.
    pub fn disabled() -> Self {
        Self::every(Duration::ZERO)
    }

    /// Clamps out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Heartbeat::new`]. A non-zero interval
    /// below [`Self::MIN_INTERVAL`] is raised to it.
    pub fn validated(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "keep-alive interval too short, raising"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self
    }

    /// Returns `true` if this config never beats.
    pub fn is_disabled(&self) -> bool {
        self.interval.is_zero()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// One fired beat, returned by [`Heartbeat::wait_for_beat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// Monotonically increasing beat number (starts at 1).
    pub seq: u64,
}

/// Fixed-interval beat source. One per signaling channel.
///
/// A beat that fires late reschedules the next one a full interval from
/// when it actually fired, so a stalled runtime never produces a burst.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    next: Option<Instant>,
    seq: u64,
}

impl Heartbeat {
    /// Creates a heartbeat from config. The first beat is one interval
    /// from now.
    pub fn new(config: HeartbeatConfig) -> Self {
        let config = config.validated();
        let next = if config.is_disabled() {
            debug!("keep-alive disabled");
            None
        } else {
            debug!(
                interval_ms = config.interval.as_millis() as u64,
                "keep-alive scheduled"
            );
            Some(Instant::now() + config.interval)
        };

        Self {
            config,
            next,
            seq: 0,
        }
    }

    /// Creates a heartbeat for a specific interval.
    pub fn every(interval: Duration) -> Self {
        Self::new(HeartbeatConfig::every(interval))
    }

    /// Waits until the next beat is due.
    ///
    /// When disabled or stopped this future never resolves, so it can sit
    /// in a `tokio::select!` next to other branches.
    pub async fn wait_for_beat(&mut self) -> Beat {
        let Some(next) = self.next else {
            return std::future::pending().await;
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(next);
        if late_by >= self.config.interval {
            warn!(
                seq = self.seq + 1,
                late_ms = late_by.as_millis() as u64,
                "keep-alive fell behind"
            );
        }
        self.next = Some(now + self.config.interval);
        self.seq += 1;

        trace!(seq = self.seq, "keep-alive beat");
        Beat { seq: self.seq }
    }

    /// Stops beating. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.next.take().is_some() {
            debug!(beats = self.seq, "keep-alive stopped");
        }
    }

    /// Whether this heartbeat was created disabled (zero interval).
    pub fn is_disabled(&self) -> bool {
        self.config.is_disabled()
    }
}
