// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Signal synchronization engine for hardware clock generators.
//!
//! Configures the clock generators of a device, streams the monitored lines
//! together with the device tick counter, and records rollover-corrected
//! edge timestamps.

pub mod allocator;
pub mod batch;
pub mod clock_params;
pub mod device;
pub mod device_traits;
pub mod edges;
pub mod error;
pub mod polling;
pub mod registers;
pub mod rollover;
pub mod settings;
pub(crate) mod signal;
pub mod simulated;
pub mod sink;
pub mod streaming;
pub mod timebase;

pub use allocator::ClockChannel;
pub use device::ClockDevice;
pub use device_traits::{DeviceTraits, LABJACK_T4_TRAITS, SIMULATED_TRAITS};
pub use error::{Error, Result};
pub use polling::EdgeType;
pub use settings::SessionSettings;
pub use sink::{EdgeRecord, SinkTarget};
pub use streaming::StreamReport;
