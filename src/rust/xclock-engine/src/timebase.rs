// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use chrono::Utc;

pub const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a tick count of a counter running at `timer_frequency_hz` to nanoseconds.
///
/// Uses 128-bit intermediates, the result truncates towards zero.
pub fn ticks_to_nanoseconds(ticks: i64, timer_frequency_hz: u32) -> i64 {
    (ticks as i128 * NANOSECONDS_PER_SECOND as i128 / timer_frequency_hz as i128) as i64
}

/// Period of a clock in nanoseconds.
pub fn period_nanoseconds(rate_hz: u32) -> f64 {
    NANOSECONDS_PER_SECOND as f64 / rate_hz as f64
}

/// Host wall clock as nanoseconds since the Unix epoch.
pub fn host_timestamp_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
