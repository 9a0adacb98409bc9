// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::batch::SampleBatch;

/// Number of distinct values of the hardware tick counter.
pub const COUNTER_PERIOD: i64 = 1 << 32;

/// A backwards step larger than this is read as a counter wrap.
const WRAP_THRESHOLD: i64 = -(1 << 31);

/// Rollover bookkeeping of one streaming session.
///
/// Turns the wrapping 32-bit tick counter into a non-decreasing 64-bit
/// tick stream. Owned by the acquisition task; starts from zero for every
/// session.
#[derive(Debug, Default, Clone)]
pub struct RolloverState {
    /// Last raw counter value seen, before any offset.
    last_raw_tick: i64,
    /// Accumulated correction carried into the next batch.
    offset: i64,
    rollover_count: u64,
    anomaly_count: u64,
    last_corrected_tick: Option<i64>,
}

/// What happened while correcting one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchCorrection {
    pub rollovers: u64,
    pub anomalies: u64,
}

impl RolloverState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn rollover_count(&self) -> u64 {
        self.rollover_count
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomaly_count
    }

    pub fn last_raw_tick(&self) -> i64 {
        self.last_raw_tick
    }

    /// Correct the tick column of `batch` in place.
    ///
    /// Differences are taken between consecutive raw ticks, starting from the
    /// last raw tick of the previous batch. Each wrap adds one counter period
    /// to its own sample and every later sample. A negative step too small to
    /// be a wrap is logged and the tick is clamped to its predecessor.
    pub fn correct(&mut self, batch: &mut SampleBatch) -> BatchCorrection {
        let mut correction = BatchCorrection::default();
        let mut previous_raw = self.last_raw_tick;
        let mut increment = 0;
        for tick in batch.ticks_mut() {
            let raw = *tick;
            let delta = raw - previous_raw;
            if delta < WRAP_THRESHOLD {
                increment += COUNTER_PERIOD;
                correction.rollovers += 1;
            } else if delta < 0 {
                correction.anomalies += 1;
                xclock_log::warn!(
                    "Non-monotonic tick counter step of {} ticks ({} -> {}), clamping",
                    delta,
                    previous_raw,
                    raw
                );
            }
            let mut corrected = raw + self.offset + increment;
            if let Some(last) = self.last_corrected_tick
                && corrected < last
            {
                corrected = last;
            }
            *tick = corrected;
            self.last_corrected_tick = Some(corrected);
            previous_raw = raw;
        }
        self.last_raw_tick = previous_raw;
        self.offset += increment;
        self.rollover_count += correction.rollovers;
        self.anomaly_count += correction.anomalies;
        if correction.rollovers > 0 {
            xclock_log::info!(
                "Tick counter rollover detected (total {}), offset is now {}",
                self.rollover_count,
                self.offset
            );
        }
        correction
    }
}
