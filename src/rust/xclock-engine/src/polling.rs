// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register polling on the caller's thread: pulse completion and trigger edges.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::registers::{Connection, LineRegisters};

/// Blocks until pulse-out lines emitted their configured number of pulses.
#[derive(Debug, Clone)]
pub struct PulseCompletionMonitor {
    settle_delay: Duration,
}

impl PulseCompletionMonitor {
    pub fn new(settle_delay: Duration) -> Self {
        PulseCompletionMonitor { settle_delay }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Poll the completed/target counters of every channel until all reached
    /// their target, then wait the settle delay.
    ///
    /// There is no deadline: a line that never completes blocks forever.
    pub fn wait_for_completion(&self, connection: &Connection, channels: &[String]) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let mut pending: Vec<&String> = channels.iter().collect();
        while !pending.is_empty() {
            let mut still_pending = Vec::with_capacity(pending.len());
            for channel in pending {
                let (completed, target) = read_pulse_counters(connection, channel)?;
                if completed >= target {
                    xclock_log::debug!(
                        "Clock channel {} finished after {} pulses",
                        channel,
                        completed
                    );
                } else {
                    still_pending.push(channel);
                }
            }
            pending = still_pending;
        }
        thread::sleep(self.settle_delay);
        Ok(())
    }
}

fn read_pulse_counters(connection: &Connection, channel: &str) -> Result<(f64, f64)> {
    let line = LineRegisters::new(channel);
    let values = connection.read_batch(&[line.read_a(), line.read_b()])?;
    match values.as_slice() {
        [completed, target] => Ok((*completed, *target)),
        _ => Err(Error::driver(format!(
            "Expected 2 pulse counter values for {channel}, got {}",
            values.len()
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    #[default]
    Rising,
    Falling,
}

impl EdgeType {
    /// Whether the level change from `previous` to `current` is this kind of edge.
    pub fn matches(self, previous: bool, current: bool) -> bool {
        match self {
            EdgeType::Rising => !previous && current,
            EdgeType::Falling => previous && !current,
        }
    }
}

fn is_high(value: f64) -> bool {
    value >= 0.5
}

/// Sample `channel` every `poll_interval` until an edge of `edge_type` shows
/// up or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. The first sample only establishes the
/// starting level.
pub fn wait_for_trigger_edge(
    connection: &Connection,
    channel: &str,
    timeout: Duration,
    edge_type: EdgeType,
    poll_interval: Duration,
) -> Result<bool> {
    let mut timer = connection.interface().interval_timer(poll_interval);
    if timer.is_none() {
        xclock_log::debug!("No interval timer available, polling {} on wall clock", channel);
    }
    let deadline = Instant::now() + timeout;
    let mut previous = is_high(connection.read(channel)?);
    loop {
        if Instant::now() >= deadline {
            xclock_log::warn!(
                "No {:?} edge on {} within {:?}",
                edge_type,
                channel,
                timeout
            );
            return Ok(false);
        }
        match timer.as_mut() {
            Some(timer) => {
                timer.wait_for_next_interval()?;
            }
            None => thread::sleep(poll_interval),
        }
        let current = is_high(connection.read(channel)?);
        if edge_type.matches(previous, current) {
            xclock_log::debug!("Detected {:?} edge on {}", edge_type, channel);
            return Ok(true);
        }
        previous = current;
    }
}
