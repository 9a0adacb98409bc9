// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::clock_params::ClockParameters;
use crate::device_traits::DeviceTraits;
use crate::error::{Error, Result};
use crate::polling::PulseCompletionMonitor;
use crate::registers::{
    ClockRegisters, Connection, FeatureIndex, LineRegisters, clock_enable_writes,
};

/// One hardware-generated clock signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockChannel {
    pub channel_name: String,
    /// Clock generator driving the channel, assigned in allocation order from 1.
    pub clock_id: u8,
    pub requested_rate_hz: u32,
    /// Rate achieved with the quantized roll value.
    pub actual_rate_hz: u32,
    pub clock_enabled: bool,
    /// `None` for a continuous clock.
    pub number_of_pulses: Option<u32>,
}

impl ClockChannel {
    pub fn is_pulsed(&self) -> bool {
        self.number_of_pulses.is_some()
    }
}

/// Bookkeeping of the clock channels of one device.
///
/// Channel names come from the device's output pool and go back to it on
/// [`ClockAllocator::clear_clocks`].
#[derive(Debug)]
pub struct ClockAllocator {
    traits: &'static DeviceTraits,
    channels: IndexMap<String, ClockChannel>,
    unused_channel_names: IndexSet<String>,
}

impl ClockAllocator {
    pub fn new(traits: &'static DeviceTraits) -> Self {
        ClockAllocator {
            traits,
            channels: IndexMap::new(),
            unused_channel_names: Self::full_pool(traits),
        }
    }

    fn full_pool(traits: &DeviceTraits) -> IndexSet<String> {
        traits
            .output_clock_channels
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn channels(&self) -> impl Iterator<Item = &ClockChannel> {
        self.channels.values()
    }

    pub fn channel(&self, name: &str) -> Option<&ClockChannel> {
        self.channels.get(name)
    }

    pub fn unused_channel_names(&self) -> Vec<String> {
        self.unused_channel_names.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn has_pulsed_channels(&self) -> bool {
        self.channels.values().any(ClockChannel::is_pulsed)
    }

    /// Configure the next clock channel and program its generator.
    ///
    /// `duration` is converted to a pulse count at the requested rate. When
    /// neither `number_of_pulses` nor `duration` is given, the clock runs until
    /// stopped.
    pub fn add_clock_channel(
        &mut self,
        connection: &Connection,
        rate_hz: u32,
        channel_name: Option<&str>,
        number_of_pulses: Option<u32>,
        duration: Option<Duration>,
        enable_clock_now: bool,
    ) -> Result<ClockChannel> {
        if number_of_pulses.is_some() && duration.is_some() {
            return Err(Error::ConflictingPulseSpecification);
        }
        let parameters = ClockParameters::for_device(rate_hz, self.traits)?;
        let number_of_pulses = match duration {
            Some(duration) => Some(pulses_for_duration(duration, rate_hz)?),
            None => number_of_pulses,
        };
        if number_of_pulses == Some(0) {
            return Err(Error::InvalidParameter(
                "A pulsed clock needs at least one pulse".to_string(),
            ));
        }
        let channel_name = self.claim_channel_name(channel_name)?;
        let clock_id = self.channels.len() as u8 + 1;

        if let Err(err) = program_clock_channel(
            connection,
            &channel_name,
            clock_id,
            &parameters,
            number_of_pulses,
            enable_clock_now,
        ) {
            self.unused_channel_names = Self::full_pool(self.traits)
                .into_iter()
                .filter(|name| !self.channels.contains_key(name))
                .collect();
            return Err(err);
        }

        let channel = ClockChannel {
            channel_name: channel_name.clone(),
            clock_id,
            requested_rate_hz: rate_hz,
            actual_rate_hz: parameters.actual_rate_hz(self.traits.base_clock_frequency_hz),
            clock_enabled: enable_clock_now,
            number_of_pulses,
        };
        xclock_log::debug!(
            "Added clock channel {} on clock {} at {} Hz (requested {} Hz, pulses {:?})",
            channel.channel_name,
            clock_id,
            channel.actual_rate_hz,
            rate_hz,
            number_of_pulses
        );
        self.channels.insert(channel_name, channel.clone());
        Ok(channel)
    }

    fn claim_channel_name(&mut self, requested: Option<&str>) -> Result<String> {
        if let Some(name) = requested
            && !self.traits.is_output_clock_channel(name)
        {
            return Err(Error::InvalidChannel {
                name: name.to_string(),
                available: Self::full_pool(self.traits).into_iter().collect(),
            });
        }
        if self.unused_channel_names.is_empty() {
            return Err(Error::ChannelPoolExhausted(
                self.channels.keys().cloned().collect(),
            ));
        }
        match requested {
            None => self
                .unused_channel_names
                .shift_remove_index(0)
                .ok_or_else(|| Error::ChannelPoolExhausted(self.channels.keys().cloned().collect())),
            Some(name) => {
                if self.unused_channel_names.shift_remove(name) {
                    Ok(name.to_string())
                } else {
                    Err(Error::ChannelInUse(name.to_string()))
                }
            }
        }
    }

    /// Enable every configured generator and output line in one batched write.
    pub fn enable_all(&mut self, connection: &Connection) -> Result<()> {
        if self.channels.is_empty() {
            xclock_log::warn!("No clock channels configured, nothing to start");
            return Ok(());
        }
        let mut writes = clock_enable_writes(self.channels.values().map(|c| c.clock_id), true);
        writes.extend(
            self.channels
                .keys()
                .map(|name| (LineRegisters::new(name).enable(), 1.0)),
        );
        connection.write_batch(&writes)?;
        self.channels
            .values_mut()
            .for_each(|channel| channel.clock_enabled = true);
        Ok(())
    }

    /// Start all clocks, optionally blocking until every pulsed clock finished.
    ///
    /// Finished pulsed clocks get their outputs disabled, continuous clocks
    /// keep running.
    pub fn start_clocks(
        &mut self,
        connection: &Connection,
        wait_for_pulsed_clocks_to_finish: bool,
        monitor: &PulseCompletionMonitor,
    ) -> Result<()> {
        self.enable_all(connection)?;
        if wait_for_pulsed_clocks_to_finish && self.has_pulsed_channels() {
            self.wait_for_pulsed_clocks(connection, monitor)?;
        }
        Ok(())
    }

    /// Block until all pulsed clocks completed, then disable their outputs.
    pub fn wait_for_pulsed_clocks(
        &mut self,
        connection: &Connection,
        monitor: &PulseCompletionMonitor,
    ) -> Result<()> {
        let pulsed: Vec<String> = self
            .channels
            .values()
            .filter(|channel| channel.is_pulsed())
            .map(|channel| channel.channel_name.clone())
            .collect();
        monitor.wait_for_completion(connection, &pulsed)?;
        self.disable(connection, |channel| channel.is_pulsed())
    }

    /// Disable all output lines and generators.
    pub fn stop_clocks(&mut self, connection: &Connection) -> Result<()> {
        self.disable(connection, |_| true)
    }

    /// Stop all clocks and return every channel to the pool.
    pub fn clear_clocks(&mut self, connection: &Connection) -> Result<()> {
        self.stop_clocks(connection)?;
        self.channels.clear();
        self.unused_channel_names = Self::full_pool(self.traits);
        Ok(())
    }

    fn disable(
        &mut self,
        connection: &Connection,
        selected: impl Fn(&ClockChannel) -> bool,
    ) -> Result<()> {
        let (lines, clocks): (Vec<_>, Vec<_>) = self
            .channels
            .values()
            .filter(|channel| selected(channel))
            .map(|channel| (channel.channel_name.clone(), channel.clock_id))
            .unzip();
        let mut writes: Vec<(String, f64)> = lines
            .iter()
            .map(|name| (LineRegisters::new(name).enable(), 0.0))
            .collect();
        writes.extend(clock_enable_writes(clocks, false));
        connection.write_batch(&writes)?;
        self.channels
            .values_mut()
            .filter(|channel| selected(channel))
            .for_each(|channel| channel.clock_enabled = false);
        Ok(())
    }
}

/// Whole pulses emitted at `rate_hz` within `duration`.
fn pulses_for_duration(duration: Duration, rate_hz: u32) -> Result<u32> {
    let pulses = duration.as_nanos() * u128::from(rate_hz) / 1_000_000_000;
    u32::try_from(pulses).map_err(|_| {
        Error::InvalidParameter(format!(
            "{} s at {} Hz exceeds the maximum pulse count of {}",
            duration.as_secs_f64(),
            rate_hz,
            u32::MAX
        ))
    })
}

/// Program generator and output line of one clock channel.
fn program_clock_channel(
    connection: &Connection,
    channel_name: &str,
    clock_id: u8,
    parameters: &ClockParameters,
    number_of_pulses: Option<u32>,
    enable: bool,
) -> Result<()> {
    let line = LineRegisters::new(channel_name);
    let clock = ClockRegisters::new(clock_id);

    // the feature index cannot change while the line is enabled
    connection.write(&line.enable(), 0.0)?;
    connection.write_batch(&clock_enable_writes([clock_id], false))?;
    connection.write_batch(&[
        (clock.options(), 0.0),
        (clock.divisor(), parameters.divisor as f64),
        (clock.roll_value(), parameters.roll_value as f64),
    ])?;

    let feature = match number_of_pulses {
        Some(_) => FeatureIndex::PulseOut,
        None => FeatureIndex::PwmOut,
    };
    connection.write_batch(&[
        (line.clock_source(), clock_id as f64),
        (line.feature_index(), feature.value()),
        (line.config_a(), parameters.duty_cycle as f64),
        (line.config_b(), 0.0),
        (line.config_c(), number_of_pulses.unwrap_or(0) as f64),
    ])?;

    if enable {
        connection.write_batch(&[(clock.enable(), 1.0), (line.enable(), 1.0)])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device_traits::SIMULATED_TRAITS;
    use crate::simulated::SimulatedDevice;

    fn setup() -> (Arc<SimulatedDevice>, Connection, ClockAllocator) {
        let device = Arc::new(SimulatedDevice::new(&SIMULATED_TRAITS));
        let connection = Connection::open(device.as_interface()).unwrap();
        (device, connection, ClockAllocator::new(&SIMULATED_TRAITS))
    }

    #[test]
    fn test_add_clock_channel() {
        let (device, connection, mut allocator) = setup();
        let channel = allocator
            .add_clock_channel(&connection, 100, Some("FOOCLK1"), None, None, false)
            .unwrap();
        assert_eq!(channel.actual_rate_hz, 100);
        assert_eq!(channel.channel_name, "FOOCLK1");
        assert_eq!(channel.clock_id, 1);
        assert!(!channel.clock_enabled);
        assert_eq!(channel.number_of_pulses, None);

        assert_eq!(device.register("DIO_EF_CLOCK1_ROLL_VALUE"), Some(3125.0));
        assert_eq!(device.register("DIO_EF_CLOCK1_DIVISOR"), Some(256.0));
        assert_eq!(device.register("DIO_EF_CLOCK1_OPTIONS"), Some(0.0));
        assert_eq!(device.register("FOOCLK1_EF_INDEX"), Some(0.0));
        assert_eq!(device.register("FOOCLK1_EF_CONFIG_A"), Some(1562.0));
        assert_eq!(device.register("FOOCLK1_EF_ENABLE"), Some(0.0));
        assert_eq!(allocator.unused_channel_names(), vec!["FOOCLK2".to_string()]);
    }

    #[test]
    fn test_nonexistent_channel_fails() {
        let (_device, connection, mut allocator) = setup();
        let err = allocator
            .add_clock_channel(&connection, 100, Some("NONEXISTANT_CHANNEL"), None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidChannel { .. }));
        assert!(err.is_configuration_error());
        assert_eq!(allocator.unused_channel_names().len(), 2);
    }

    #[test]
    fn test_channel_in_use() {
        let (_device, connection, mut allocator) = setup();
        allocator
            .add_clock_channel(&connection, 100, Some("FOOCLK2"), None, None, false)
            .unwrap();
        let err = allocator
            .add_clock_channel(&connection, 100, Some("FOOCLK2"), None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::ChannelInUse(name) if name == "FOOCLK2"));
    }

    #[test]
    fn test_automatic_channel_selection_and_exhaustion() {
        let (_device, connection, mut allocator) = setup();
        let first = allocator
            .add_clock_channel(&connection, 30, None, None, None, false)
            .unwrap();
        let second = allocator
            .add_clock_channel(&connection, 30, None, None, None, false)
            .unwrap();
        assert_eq!(first.channel_name, "FOOCLK1");
        assert_eq!(second.channel_name, "FOOCLK2");
        assert_eq!(second.clock_id, 2);
        assert!(allocator.unused_channel_names().is_empty());

        let err = allocator
            .add_clock_channel(&connection, 100, None, None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::ChannelPoolExhausted(used) if used.len() == 2));
    }

    #[test]
    fn test_duration_and_pulses_conflict() {
        let (_device, connection, mut allocator) = setup();
        let err = allocator
            .add_clock_channel(
                &connection,
                100,
                None,
                Some(10),
                Some(Duration::from_secs(1)),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingPulseSpecification));
        assert!(allocator.is_empty());
    }

    #[test]
    fn test_duration_derives_pulses() {
        let (device, connection, mut allocator) = setup();
        let channel = allocator
            .add_clock_channel(
                &connection,
                60,
                None,
                None,
                Some(Duration::from_millis(2500)),
                false,
            )
            .unwrap();
        assert_eq!(channel.number_of_pulses, Some(150));
        assert_eq!(device.register("FOOCLK1_EF_INDEX"), Some(2.0));
        assert_eq!(device.register("FOOCLK1_EF_CONFIG_C"), Some(150.0));
    }

    #[test]
    fn test_duration_pulses_are_exact() {
        let (_device, connection, mut allocator) = setup();
        let channel = allocator
            .add_clock_channel(
                &connection,
                100,
                None,
                None,
                Some(Duration::from_millis(2300)),
                false,
            )
            .unwrap();
        assert_eq!(channel.number_of_pulses, Some(230));
        assert_eq!(pulses_for_duration(Duration::from_millis(700), 10).unwrap(), 7);
        assert_eq!(pulses_for_duration(Duration::from_micros(29_999), 100).unwrap(), 2);
    }

    #[test]
    fn test_duration_pulse_overflow_rejected() {
        let (_device, connection, mut allocator) = setup();
        let err = allocator
            .add_clock_channel(
                &connection,
                100_000,
                None,
                None,
                Some(Duration::from_secs(100_000)),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert!(err.is_configuration_error());
        assert_eq!(allocator.unused_channel_names().len(), 2);
    }

    #[test]
    fn test_invalid_name_reported_when_pool_exhausted() {
        let (_device, connection, mut allocator) = setup();
        for _ in 0..2 {
            allocator
                .add_clock_channel(&connection, 100, None, None, None, false)
                .unwrap();
        }
        let err = allocator
            .add_clock_channel(&connection, 100, Some("NOT_A_CHANNEL"), None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidChannel { name, .. } if name == "NOT_A_CHANNEL"));
    }

    #[test]
    fn test_zero_pulses_rejected() {
        let (_device, connection, mut allocator) = setup();
        let err = allocator
            .add_clock_channel(
                &connection,
                100,
                None,
                None,
                Some(Duration::from_millis(1)),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(allocator.unused_channel_names().len(), 2);
    }

    #[test]
    fn test_rate_out_of_range() {
        let (_device, connection, mut allocator) = setup();
        let err = allocator
            .add_clock_channel(&connection, 200_000, None, None, None, false)
            .unwrap_err();
        assert!(matches!(err, Error::RateOutOfRange { rate_hz: 200_000, .. }));
    }

    #[test]
    fn test_start_stop_and_clear() {
        let (device, connection, mut allocator) = setup();
        allocator
            .add_clock_channel(&connection, 100, Some("FOOCLK2"), None, None, false)
            .unwrap();
        allocator
            .add_clock_channel(&connection, 50, Some("FOOCLK1"), None, None, false)
            .unwrap();

        allocator.enable_all(&connection).unwrap();
        assert!(allocator.channels().all(|channel| channel.clock_enabled));
        assert_eq!(device.register("FOOCLK1_EF_ENABLE"), Some(1.0));
        assert_eq!(device.register("DIO_EF_CLOCK2_ENABLE"), Some(1.0));

        allocator.stop_clocks(&connection).unwrap();
        assert!(allocator.channels().all(|channel| !channel.clock_enabled));
        assert_eq!(device.register("FOOCLK2_EF_ENABLE"), Some(0.0));
        assert_eq!(device.register("DIO_EF_CLOCK1_ENABLE"), Some(0.0));

        allocator.clear_clocks(&connection).unwrap();
        assert!(allocator.is_empty());
        assert_eq!(
            allocator.unused_channel_names(),
            vec!["FOOCLK1".to_string(), "FOOCLK2".to_string()]
        );
        let channel = allocator
            .add_clock_channel(&connection, 100, None, None, None, false)
            .unwrap();
        assert_eq!(channel.clock_id, 1);
    }

    #[test]
    fn test_pulsed_clock_finishes() {
        let (_device, connection, mut allocator) = setup();
        allocator
            .add_clock_channel(&connection, 100, None, Some(10), None, false)
            .unwrap();
        allocator
            .add_clock_channel(&connection, 100, None, None, None, false)
            .unwrap();
        let monitor = PulseCompletionMonitor::new(Duration::from_millis(5));
        let start = std::time::Instant::now();
        allocator.start_clocks(&connection, true, &monitor).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));

        let pulsed = allocator.channel("FOOCLK1").unwrap();
        assert!(!pulsed.clock_enabled);
        let continuous = allocator.channel("FOOCLK2").unwrap();
        assert!(continuous.clock_enabled);
    }
}
