// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

/// Device specific traits for clock generation and edge streaming
///
/// One constant descriptor per supported device family. Channel pools are
/// listed in the order in which free channels are handed out.
#[derive(Debug)]
pub struct DeviceTraits {
    pub name: &'static str,
    pub base_clock_frequency_hz: u32,
    pub clock_divisor: u32,
    /// Frequency of the free-running tick counter used as stream timebase.
    pub core_timer_frequency_hz: u32,
    pub output_clock_channels: &'static [&'static str],
    pub input_trigger_channels: &'static [&'static str],
    /// Stream register holding the (lower word of the) tick counter.
    pub core_timer_register: &'static str,
    /// Stream register holding the upper 16 bits of the tick counter, if the
    /// device splits the counter across two scan addresses.
    pub core_timer_high_register: Option<&'static str>,
    /// Clock generators disabled on open, as they are mutually exclusive with
    /// the generators assigned to channels.
    pub exclusive_clock_ids: &'static [u8],
}

impl DeviceTraits {
    pub fn is_output_clock_channel(&self, name: &str) -> bool {
        self.output_clock_channels.contains(&name)
    }

    pub fn is_input_trigger_channel(&self, name: &str) -> bool {
        self.input_trigger_channels.contains(&name)
    }

    /// Stream registers appended after the monitored channels.
    pub fn core_timer_scan_registers(&self) -> Vec<&'static str> {
        let mut registers = vec![self.core_timer_register];
        registers.extend(self.core_timer_high_register);
        registers
    }
}

pub const LABJACK_T4_TRAITS: DeviceTraits = DeviceTraits {
    name: "LabJack T4",
    base_clock_frequency_hz: 80_000_000,
    clock_divisor: 256,
    core_timer_frequency_hz: 40_000_000,
    output_clock_channels: &["DIO6", "DIO7"],
    input_trigger_channels: &["DIO4", "DIO5"],
    core_timer_register: "CORE_TIMER",
    core_timer_high_register: Some("STREAM_DATA_CAPTURE_16"),
    exclusive_clock_ids: &[0],
};

pub const SIMULATED_TRAITS: DeviceTraits = DeviceTraits {
    name: "Simulated Device",
    base_clock_frequency_hz: 80_000_000,
    clock_divisor: 256,
    core_timer_frequency_hz: 40_000_000,
    output_clock_channels: &["FOOCLK1", "FOOCLK2"],
    input_trigger_channels: &["FOOIO4", "FOOIO5"],
    core_timer_register: "CORE_TIMER",
    core_timer_high_register: Some("STREAM_DATA_CAPTURE_16"),
    exclusive_clock_ids: &[0],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_timer_scan_registers() {
        assert_eq!(
            LABJACK_T4_TRAITS.core_timer_scan_registers(),
            vec!["CORE_TIMER", "STREAM_DATA_CAPTURE_16"]
        );
    }

    #[test]
    fn test_channel_pools() {
        assert!(SIMULATED_TRAITS.is_output_clock_channel("FOOCLK2"));
        assert!(!SIMULATED_TRAITS.is_output_clock_channel("FOOIO4"));
        assert!(LABJACK_T4_TRAITS.is_input_trigger_channel("DIO4"));
    }
}
