// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Session orchestration of one clock device.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;

use crate::allocator::{ClockAllocator, ClockChannel};
use crate::device_traits::DeviceTraits;
use crate::error::{Error, Result};
use crate::polling::{self, EdgeType, PulseCompletionMonitor};
use crate::registers::{Connection, RegisterInterface, clock_enable_writes};
use crate::settings::SessionSettings;
use crate::sink::{CsvEdgeSink, EdgeSink, SinkTarget};
use crate::streaming::{EdgeStreamer, StreamConfig, StreamReport};

/// A clock device with its channels and, while recording, its edge stream.
///
/// Every operation fails with [`Error::DeviceNotInitialized`] once the device
/// was closed.
#[derive(Debug)]
pub struct ClockDevice {
    traits: &'static DeviceTraits,
    settings: SessionSettings,
    connection: Option<Connection>,
    allocator: ClockAllocator,
    monitor: PulseCompletionMonitor,
    recording: Option<EdgeStreamer>,
    /// Streamer whose stop timed out while its thread was blocked in a read.
    detached: Option<EdgeStreamer>,
    last_report: Option<StreamReport>,
}

impl ClockDevice {
    pub fn open(
        interface: Arc<dyn RegisterInterface>,
        traits: &'static DeviceTraits,
        settings: SessionSettings,
    ) -> Result<Self> {
        settings.validate()?;
        let connection = Connection::open(interface)?;
        if let Err(err) =
            connection.write_batch(&clock_enable_writes(traits.exclusive_clock_ids.iter().copied(), false))
        {
            if let Err(close_err) = connection.close() {
                xclock_log::warn!("Failed to close {} after a failed open: {}", traits.name, close_err);
            }
            return Err(err);
        }
        xclock_log::debug!(
            "Opened {} (handle {})",
            traits.name,
            connection.handle().0
        );
        Ok(ClockDevice {
            traits,
            monitor: PulseCompletionMonitor::new(settings.settle_delay()),
            settings,
            connection: Some(connection),
            allocator: ClockAllocator::new(traits),
            recording: None,
            detached: None,
            last_report: None,
        })
    }

    pub fn traits(&self) -> &'static DeviceTraits {
        self.traits
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::DeviceNotInitialized)
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn get_available_output_clock_channels(&self) -> Result<Vec<String>> {
        self.connection()?;
        Ok(self
            .traits
            .output_clock_channels
            .iter()
            .map(|name| name.to_string())
            .collect())
    }

    pub fn get_available_input_start_trigger_channels(&self) -> Result<Vec<String>> {
        self.connection()?;
        Ok(self
            .traits
            .input_trigger_channels
            .iter()
            .map(|name| name.to_string())
            .collect())
    }

    pub fn get_added_clock_channels(&self) -> Result<Vec<ClockChannel>> {
        self.connection()?;
        Ok(self.allocator.channels().cloned().collect())
    }

    pub fn get_unused_clock_channel_names(&self) -> Result<Vec<String>> {
        self.connection()?;
        Ok(self.allocator.unused_channel_names())
    }

    /// Add a clock channel, see [`ClockAllocator::add_clock_channel`].
    pub fn add_clock_channel(
        &mut self,
        rate_hz: u32,
        channel_name: Option<&str>,
        number_of_pulses: Option<u32>,
        duration: Option<Duration>,
        enable_clock_now: bool,
    ) -> Result<ClockChannel> {
        let connection = self.connection.as_ref().ok_or(Error::DeviceNotInitialized)?;
        self.allocator.add_clock_channel(
            connection,
            rate_hz,
            channel_name,
            number_of_pulses,
            duration,
            enable_clock_now,
        )
    }

    pub fn start_clocks(&mut self, wait_for_pulsed_clocks_to_finish: bool) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(Error::DeviceNotInitialized)?;
        self.allocator
            .start_clocks(connection, wait_for_pulsed_clocks_to_finish, &self.monitor)
    }

    /// Start the clocks while recording the edges of every clock channel and
    /// of `extra_channels` to a CSV file.
    ///
    /// Without `filename` a timestamped file in the output directory is used.
    /// Returns the path of the file. See [`Self::start_clocks_and_record_edges`].
    pub fn start_clocks_and_record_edge_timestamps(
        &mut self,
        wait_for_pulsed_clocks_to_finish: bool,
        extra_channels: &[&str],
        filename: Option<&Path>,
    ) -> Result<PathBuf> {
        self.connection()?;
        let path = match filename {
            Some(path) => path.to_path_buf(),
            None => self.settings.default_recording_path()?,
        };
        let sink = CsvEdgeSink::create(&path)?;
        self.record(wait_for_pulsed_clocks_to_finish, extra_channels, Box::new(sink))?;
        Ok(path)
    }

    /// Start the clocks while recording edges into `target`.
    ///
    /// The stream runs before any clock is enabled. With
    /// `wait_for_pulsed_clocks_to_finish`, this returns after the pulsed
    /// clocks completed and the recording was stopped. Otherwise recording
    /// continues until [`Self::stop_clocks`].
    pub fn start_clocks_and_record_edges(
        &mut self,
        wait_for_pulsed_clocks_to_finish: bool,
        extra_channels: &[&str],
        target: &SinkTarget,
    ) -> Result<()> {
        self.connection()?;
        let sink = target.open()?;
        self.record(wait_for_pulsed_clocks_to_finish, extra_channels, sink)
    }

    /// Monitored lines: clock channels first, then extra channels, without duplicates.
    fn monitored_channels(&self, extra_channels: &[&str]) -> Vec<String> {
        let channels: IndexSet<String> = self
            .allocator
            .channels()
            .map(|channel| channel.channel_name.clone())
            .chain(extra_channels.iter().map(|name| name.to_string()))
            .collect();
        channels.into_iter().collect()
    }

    fn record(
        &mut self,
        wait_for_pulsed_clocks_to_finish: bool,
        extra_channels: &[&str],
        sink: Box<dyn EdgeSink>,
    ) -> Result<()> {
        let connection = self.connection.clone().ok_or(Error::DeviceNotInitialized)?;
        if self.recording.is_some() {
            return Err(Error::InvalidParameter(
                "A recording is already running".to_string(),
            ));
        }
        if self.allocator.is_empty() {
            return Err(Error::InvalidParameter(
                "No clock channels configured".to_string(),
            ));
        }
        self.wait_for_detached_stream(self.settings.ready_timeout())?;
        let config = StreamConfig {
            channels: self.monitored_channels(extra_channels),
            scan_rate_hz: self.settings.scan_rate_hz as f64,
            scans_per_read: self.settings.scans_per_read(),
            join_timeout: self.settings.join_timeout(),
        };
        let streamer = EdgeStreamer::start(&connection, self.traits, config, sink)?;
        self.recording = Some(streamer);

        let ready_timeout = self.settings.ready_timeout();
        if !self
            .recording
            .as_ref()
            .is_some_and(|streamer| streamer.wait_until_ready(ready_timeout))
        {
            self.stop_recording();
            return Err(Error::StreamNotReady(ready_timeout));
        }
        if let Err(err) = self.allocator.enable_all(&connection) {
            self.stop_recording();
            return Err(err);
        }

        if !wait_for_pulsed_clocks_to_finish {
            return Ok(());
        }
        if !self.allocator.has_pulsed_channels() {
            xclock_log::warn!("Only continuous clocks configured, recording until stopped");
            return Ok(());
        }
        let finished = self
            .allocator
            .wait_for_pulsed_clocks(&connection, &self.monitor);
        // continuous clocks would run on unrecorded
        let stopped = self.allocator.stop_clocks(&connection);
        self.stop_recording();
        finished.and(stopped)
    }

    fn stop_recording(&mut self) {
        if let Some(mut streamer) = self.recording.take() {
            self.last_report = streamer.stop();
            if !streamer.is_finished() {
                self.detached = Some(streamer);
            }
        }
    }

    /// Wait for the thread of a timed-out stop, which still owns the device
    /// stream until its pending read returns.
    fn wait_for_detached_stream(&mut self, timeout: Duration) -> Result<()> {
        let Some(mut streamer) = self.detached.take() else {
            return Ok(());
        };
        xclock_log::debug!("Waiting for the previous acquisition thread to exit");
        if let Some(report) = streamer.stop_within(timeout) {
            self.last_report = Some(report);
        }
        if streamer.is_finished() {
            return Ok(());
        }
        self.detached = Some(streamer);
        Err(Error::StreamBusy(timeout))
    }

    /// Counters of the most recently finished recording.
    pub fn last_stream_report(&self) -> Option<&StreamReport> {
        self.last_report.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Stop all clocks, then any running recording.
    pub fn stop_clocks(&mut self) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(Error::DeviceNotInitialized)?;
        let stopped = self.allocator.stop_clocks(connection);
        self.stop_recording();
        stopped
    }

    pub fn clear_clocks(&mut self) -> Result<()> {
        if self.recording.is_some() {
            self.stop_clocks()?;
        }
        let connection = self.connection.as_ref().ok_or(Error::DeviceNotInitialized)?;
        self.allocator.clear_clocks(connection)
    }

    /// Wait for an edge on an input trigger line. Returns `false` on timeout.
    pub fn wait_for_trigger_edge(
        &self,
        channel_name: &str,
        timeout: Duration,
        edge_type: EdgeType,
    ) -> Result<bool> {
        let connection = self.connection()?;
        if !self.traits.is_input_trigger_channel(channel_name) {
            return Err(Error::InvalidChannel {
                name: channel_name.to_string(),
                available: self
                    .traits
                    .input_trigger_channels
                    .iter()
                    .map(|name| name.to_string())
                    .collect(),
            });
        }
        polling::wait_for_trigger_edge(
            connection,
            channel_name,
            timeout,
            edge_type,
            self.settings.trigger_poll_interval(),
        )
    }

    /// Stop clocks and recording and release the device handle.
    ///
    /// The handle is released even if stopping the clocks failed.
    pub fn close(&mut self) -> Result<()> {
        let connection = self.connection.take().ok_or(Error::DeviceNotInitialized)?;
        let stopped = if self.recording.is_some() {
            let stopped = self.allocator.stop_clocks(&connection);
            self.stop_recording();
            stopped
        } else {
            Ok(())
        };
        if let Err(err) = self.wait_for_detached_stream(self.settings.ready_timeout()) {
            xclock_log::warn!("Closing {} with a running acquisition thread: {}", self.traits.name, err);
        }
        xclock_log::debug!("Closing {} (handle {})", self.traits.name, connection.handle().0);
        let closed = connection.close();
        stopped.and(closed)
    }
}

impl Drop for ClockDevice {
    fn drop(&mut self) {
        if self.connection.is_some()
            && let Err(err) = self.close()
        {
            xclock_log::warn!("Failed to close {}: {}", self.traits.name, err);
        }
    }
}
