// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Named register access consumed from the vendor driver.
//!
//! The driver itself lives outside of this crate. Everything the engine needs
//! from it is expressed by [`RegisterInterface`]; concrete drivers and the
//! [`crate::simulated::SimulatedDevice`] implement it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Value marking a sample the device had to drop (buffer overflow).
pub const SKIPPED_SAMPLE: f64 = -9999.0;

pub const STREAM_SETTLING_US: &str = "STREAM_SETTLING_US";
pub const STREAM_RESOLUTION_INDEX: &str = "STREAM_RESOLUTION_INDEX";

/// Opaque device handle issued by [`RegisterInterface::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub i32);

/// One block returned by [`RegisterInterface::stream_read`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamRead {
    /// Scans flattened in scan-list order, may contain [`SKIPPED_SAMPLE`].
    pub samples: Vec<f64>,
    pub device_backlog: u32,
    pub host_backlog: u32,
}

/// Fixed-interval wait primitive of a driver.
pub trait IntervalTimer: Send {
    /// Block until the next interval boundary. Returns the number of skipped intervals.
    fn wait_for_next_interval(&mut self) -> Result<u32>;
}

pub trait RegisterInterface: Send + Sync {
    fn open(&self) -> Result<Handle>;

    fn close(&self, handle: Handle) -> Result<()>;

    fn write_named(&self, handle: Handle, name: &str, value: f64) -> Result<()>;

    /// Write all values in a single driver transaction, in the given order.
    fn write_named_batch(&self, handle: Handle, values: &[(String, f64)]) -> Result<()>;

    fn read_named(&self, handle: Handle, name: &str) -> Result<f64>;

    fn read_named_batch(&self, handle: Handle, names: &[String]) -> Result<Vec<f64>> {
        names
            .iter()
            .map(|name| self.read_named(handle, name))
            .collect()
    }

    fn resolve_addresses(&self, names: &[String]) -> Result<Vec<u32>>;

    /// Start streaming the given addresses. Returns the scan rate the device settled on.
    fn stream_start(
        &self,
        handle: Handle,
        scan_list: &[u32],
        scan_rate_hz: f64,
        scans_per_read: u32,
    ) -> Result<f64>;

    /// Block until `scans_per_read` scans are available and return them.
    fn stream_read(&self, handle: Handle) -> Result<StreamRead>;

    fn stream_stop(&self, handle: Handle) -> Result<()>;

    /// Hardware-assisted interval timer, if the driver has one.
    fn interval_timer(&self, _period: Duration) -> Option<Box<dyn IntervalTimer>> {
        None
    }
}

/// An open device: the driver plus the handle it issued.
#[derive(Clone)]
pub struct Connection {
    interface: Arc<dyn RegisterInterface>,
    handle: Handle,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .finish()
    }
}

impl Connection {
    pub fn open(interface: Arc<dyn RegisterInterface>) -> Result<Self> {
        let handle = interface.open()?;
        Ok(Connection { interface, handle })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn interface(&self) -> &dyn RegisterInterface {
        self.interface.as_ref()
    }

    pub fn write(&self, name: &str, value: f64) -> Result<()> {
        self.interface.write_named(self.handle, name, value)
    }

    pub fn write_batch(&self, values: &[(String, f64)]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.interface.write_named_batch(self.handle, values)
    }

    pub fn read(&self, name: &str) -> Result<f64> {
        self.interface.read_named(self.handle, name)
    }

    pub fn read_batch(&self, names: &[String]) -> Result<Vec<f64>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.interface.read_named_batch(self.handle, names)
    }

    pub fn resolve_addresses(&self, names: &[String]) -> Result<Vec<u32>> {
        self.interface.resolve_addresses(names)
    }

    pub fn stream_start(&self, scan_list: &[u32], scan_rate_hz: f64, scans_per_read: u32) -> Result<f64> {
        self.interface
            .stream_start(self.handle, scan_list, scan_rate_hz, scans_per_read)
    }

    pub fn stream_read(&self) -> Result<StreamRead> {
        self.interface.stream_read(self.handle)
    }

    pub fn stream_stop(&self) -> Result<()> {
        self.interface.stream_stop(self.handle)
    }

    pub fn close(self) -> Result<()> {
        self.interface.close(self.handle)
    }
}

/// Extended feature modes of a digital line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureIndex {
    PwmOut = 0,
    PulseOut = 2,
}

impl FeatureIndex {
    pub fn value(self) -> f64 {
        self as u8 as f64
    }
}

/// Register names of the extended feature block of one digital line.
#[derive(Debug, Clone, Copy)]
pub struct LineRegisters<'a> {
    channel: &'a str,
}

impl<'a> LineRegisters<'a> {
    pub fn new(channel: &'a str) -> Self {
        LineRegisters { channel }
    }

    pub fn enable(&self) -> String {
        format!("{}_EF_ENABLE", self.channel)
    }

    pub fn feature_index(&self) -> String {
        format!("{}_EF_INDEX", self.channel)
    }

    pub fn config_a(&self) -> String {
        format!("{}_EF_CONFIG_A", self.channel)
    }

    pub fn config_b(&self) -> String {
        format!("{}_EF_CONFIG_B", self.channel)
    }

    pub fn config_c(&self) -> String {
        format!("{}_EF_CONFIG_C", self.channel)
    }

    pub fn clock_source(&self) -> String {
        format!("{}_EF_CLOCK_SOURCE", self.channel)
    }

    /// Number of pulses completed in pulse-out mode.
    pub fn read_a(&self) -> String {
        format!("{}_EF_READ_A", self.channel)
    }

    /// Target number of pulses in pulse-out mode.
    pub fn read_b(&self) -> String {
        format!("{}_EF_READ_B", self.channel)
    }
}

/// Register names of one clock generator.
#[derive(Debug, Clone, Copy)]
pub struct ClockRegisters {
    clock_id: u8,
}

impl ClockRegisters {
    pub fn new(clock_id: u8) -> Self {
        ClockRegisters { clock_id }
    }

    pub fn enable(&self) -> String {
        format!("DIO_EF_CLOCK{}_ENABLE", self.clock_id)
    }

    pub fn divisor(&self) -> String {
        format!("DIO_EF_CLOCK{}_DIVISOR", self.clock_id)
    }

    pub fn roll_value(&self) -> String {
        format!("DIO_EF_CLOCK{}_ROLL_VALUE", self.clock_id)
    }

    pub fn options(&self) -> String {
        format!("DIO_EF_CLOCK{}_OPTIONS", self.clock_id)
    }
}

/// Batch of writes enabling or disabling the given generators.
pub fn clock_enable_writes(clock_ids: impl IntoIterator<Item = u8>, enable: bool) -> Vec<(String, f64)> {
    clock_ids
        .into_iter()
        .map(|id| (ClockRegisters::new(id).enable(), f64::from(u8::from(enable))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        let line = LineRegisters::new("DIO6");
        assert_eq!(line.enable(), "DIO6_EF_ENABLE");
        assert_eq!(line.config_c(), "DIO6_EF_CONFIG_C");
        assert_eq!(line.read_b(), "DIO6_EF_READ_B");
        let clock = ClockRegisters::new(2);
        assert_eq!(clock.roll_value(), "DIO_EF_CLOCK2_ROLL_VALUE");
        assert_eq!(clock.options(), "DIO_EF_CLOCK2_OPTIONS");
    }

    #[test]
    fn test_clock_enable_writes() {
        assert_eq!(
            clock_enable_writes([1, 2], true),
            vec![
                ("DIO_EF_CLOCK1_ENABLE".to_string(), 1.0),
                ("DIO_EF_CLOCK2_ENABLE".to_string(), 1.0)
            ]
        );
        assert_eq!(clock_enable_writes([0], false)[0].1, 0.0);
    }

    #[test]
    fn test_feature_index_values() {
        assert_eq!(FeatureIndex::PulseOut.value(), 2.0);
        assert_eq!(FeatureIndex::PwmOut.value(), 0.0);
    }
}
