// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "Clock rate {rate_hz} Hz is outside of the valid range ({min_hz:.3} Hz, {max_hz:.3} Hz)"
    )]
    RateOutOfRange {
        rate_hz: u32,
        min_hz: f64,
        max_hz: f64,
    },

    #[error("'duration' and 'number_of_pulses' are mutually exclusive")]
    ConflictingPulseSpecification,

    #[error("Invalid clock channel name '{name}'. Must be one of {available:?}")]
    InvalidChannel {
        name: String,
        available: Vec<String>,
    },

    #[error("Clock channel '{0}' is already in use")]
    ChannelInUse(String),

    #[error("No more clock channels available. Used channels: {0:?}")]
    ChannelPoolExhausted(Vec<String>),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Device is not initialized")]
    DeviceNotInitialized,

    #[error("Edge stream did not process its first batch within {0:?}")]
    StreamNotReady(Duration),

    #[error("Previous edge stream is still running after {0:?}")]
    StreamBusy(Duration),

    #[error("Register access failed: {0}")]
    Driver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T>(msg: T) -> Self
    where
        T: Display,
    {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    pub fn driver<T: Display>(msg: T) -> Self {
        Error::Driver(msg.to_string())
    }

    /// Whether the error stems from invalid caller input rather than the device.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::RateOutOfRange { .. }
                | Error::ConflictingPulseSpecification
                | Error::InvalidChannel { .. }
                | Error::ChannelInUse(_)
                | Error::ChannelPoolExhausted(_)
                | Error::InvalidParameter(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
