// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::device_traits::DeviceTraits;
use crate::error::{Error, Result};

/// Width of the generator roll counter used for the lower rate limit.
const ROLL_VALUE_RANGE: u64 = 1 << 16;

/// Parameters programmed into one clock generator and its output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockParameters {
    pub divisor: u32,
    pub roll_value: u32,
    pub duty_cycle: u32,
}

impl ClockParameters {
    /// Compute generator parameters for `rate_hz`.
    ///
    /// The roll value is `base / divisor / rate` in integer arithmetic, so the
    /// achieved rate is generally below the requested one. See
    /// [`ClockParameters::actual_rate_hz`].
    ///
    /// Fails if `rate_hz` does not lie strictly inside
    /// `(base / divisor / 2^16, base / divisor / 2)`.
    pub fn new(rate_hz: u32, base_frequency_hz: u32, divisor: u32) -> Result<Self> {
        if divisor == 0 {
            return Err(Error::InvalidParameter(
                "clock divisor must be non-zero".to_string(),
            ));
        }
        let base = base_frequency_hz as u64;
        let rate = rate_hz as u64;
        let divisor_64 = divisor as u64;
        // rate > base / divisor / 2^16 and rate < base / divisor / 2, without rounding
        let above_min = rate * divisor_64 * ROLL_VALUE_RANGE > base;
        let below_max = rate * divisor_64 * 2 < base;
        if !(above_min && below_max) {
            let (min_hz, max_hz) = valid_rate_range(base_frequency_hz, divisor);
            return Err(Error::RateOutOfRange {
                rate_hz,
                min_hz,
                max_hz,
            });
        }
        let roll_value = base_frequency_hz / divisor / rate_hz;
        Ok(Self {
            divisor,
            roll_value,
            duty_cycle: duty_cycle(roll_value),
        })
    }

    /// Compute generator parameters using the timing of a device family.
    pub fn for_device(rate_hz: u32, traits: &DeviceTraits) -> Result<Self> {
        Self::new(rate_hz, traits.base_clock_frequency_hz, traits.clock_divisor)
    }

    /// The rate the generator actually produces with the quantized roll value.
    pub fn actual_rate_hz(&self, base_frequency_hz: u32) -> u32 {
        base_frequency_hz / self.divisor / self.roll_value
    }
}

/// Exclusive bounds `(min, max)` of the rates a generator can produce.
pub fn valid_rate_range(base_frequency_hz: u32, divisor: u32) -> (f64, f64) {
    let generator_hz = base_frequency_hz as f64 / divisor as f64;
    (generator_hz / ROLL_VALUE_RANGE as f64, generator_hz / 2.0)
}

/// 50 % duty cycle, rounded half to even.
fn duty_cycle(roll_value: u32) -> u32 {
    (0.5 * roll_value as f64).round_ties_even() as u32
}
