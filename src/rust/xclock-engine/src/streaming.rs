// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Background acquisition of edge timestamps.
//!
//! [`EdgeStreamer::start`] starts the device stream and hands it to a
//! dedicated thread which reads batches, corrects tick rollover, detects
//! edges and appends them to an [`EdgeSink`]. The thread owns the rollover
//! state, the last row and the sink. The caller only shares the stop flag and
//! the ready latch with it, and receives a [`StreamReport`] when it exits.
//!
//! The device stream is stopped when the thread exits, whether the loop
//! ended on request or on an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::batch::SampleBatch;
use crate::device_traits::DeviceTraits;
use crate::edges::detect_edges;
use crate::error::{Error, Result};
use crate::registers::{
    Connection, STREAM_RESOLUTION_INDEX, STREAM_SETTLING_US, SKIPPED_SAMPLE,
};
use crate::rollover::RolloverState;
use crate::signal::Signal;
use crate::sink::{EdgeRecord, EdgeSink};
use crate::timebase::{host_timestamp_ns, ticks_to_nanoseconds};

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Monitored lines. The position in this list plus one is the channel code.
    pub channels: Vec<String>,
    pub scan_rate_hz: f64,
    pub scans_per_read: u32,
    pub join_timeout: Duration,
}

/// Counters of one acquisition run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamReport {
    pub batches: u64,
    pub scans: u64,
    pub edges: u64,
    /// Sample values the device marked as skipped.
    pub skipped_samples: u64,
    pub rollovers: u64,
    pub anomalies: u64,
    /// Whether the loop ended on an error instead of a stop request.
    pub faulted: bool,
}

/// Handle to a running acquisition thread.
#[derive(Debug)]
pub struct EdgeStreamer {
    stop_requested: Arc<AtomicBool>,
    ready: Arc<Signal>,
    report_receiver: Receiver<StreamReport>,
    thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
    actual_scan_rate_hz: f64,
}

impl EdgeStreamer {
    /// Start streaming `config.channels` plus the core timer and spawn the
    /// acquisition thread.
    pub fn start(
        connection: &Connection,
        traits: &DeviceTraits,
        config: StreamConfig,
        sink: Box<dyn EdgeSink>,
    ) -> Result<Self> {
        connection.write_batch(&[
            (STREAM_SETTLING_US.to_string(), 0.0),
            (STREAM_RESOLUTION_INDEX.to_string(), 0.0),
        ])?;
        // a previous session may have left the stream running
        if connection.stream_stop().is_ok() {
            xclock_log::debug!("Stopped a stream left running by a previous session");
        }

        let mut scan_names = config.channels.clone();
        scan_names.extend(
            traits
                .core_timer_scan_registers()
                .into_iter()
                .map(str::to_string),
        );
        let scan_list = connection.resolve_addresses(&scan_names)?;
        let actual_scan_rate_hz =
            connection.stream_start(&scan_list, config.scan_rate_hz, config.scans_per_read)?;
        xclock_log::info!(
            "Stream started on {:?} at {} Hz ({} scans per read)",
            config.channels,
            actual_scan_rate_hz,
            config.scans_per_read
        );

        let acquisition = Acquisition {
            connection: connection.clone(),
            channels: config.channels.len(),
            timer_words: traits.core_timer_scan_registers().len(),
            timer_frequency_hz: traits.core_timer_frequency_hz,
            rollover: RolloverState::new(),
            previous_row: None,
            origin_tick: None,
            sink,
            report: StreamReport::default(),
        };
        let stop_requested = Arc::new(AtomicBool::new(false));
        let ready = Arc::new(Signal::new());
        let (report_sender, report_receiver) = crossbeam_channel::bounded(1);
        let thread = {
            let stop_requested = Arc::clone(&stop_requested);
            let ready = Arc::clone(&ready);
            thread::Builder::new()
                .name("xclock-edge-stream".to_string())
                .spawn(move || acquisition.run(&stop_requested, &ready, &report_sender))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                stop_stream_best_effort(connection);
                return Err(err.into());
            }
        };

        Ok(EdgeStreamer {
            stop_requested,
            ready,
            report_receiver,
            thread: Some(thread),
            join_timeout: config.join_timeout,
            actual_scan_rate_hz,
        })
    }

    pub fn actual_scan_rate_hz(&self) -> f64 {
        self.actual_scan_rate_hz
    }

    /// Wait until the first batch was processed.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.ready.wait_timeout(timeout)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_raised()
    }

    /// Whether the acquisition thread exited, e.g. after a read error.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Request the loop to stop and wait the configured join timeout for it
    /// to exit.
    ///
    /// Returns `None` if the thread did not exit in time. It keeps running
    /// until its pending read returns and then stops the device stream, so
    /// the streamer must be waited for with [`Self::stop_within`] before the
    /// device streams again.
    pub fn stop(&mut self) -> Option<StreamReport> {
        let report = self.stop_within(self.join_timeout);
        if report.is_none() && !self.is_finished() {
            xclock_log::warn!(
                "Acquisition thread did not stop within {:?}, detaching it",
                self.join_timeout
            );
        }
        report
    }

    /// Request the loop to stop and wait up to `timeout` for its report.
    pub fn stop_within(&mut self, timeout: Duration) -> Option<StreamReport> {
        self.stop_requested.store(true, Ordering::Release);
        let report = match self.report_receiver.recv_timeout(timeout) {
            Ok(report) => Some(report),
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => None,
        };
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            xclock_log::error!("Acquisition thread panicked");
        }
        report
    }
}

impl Drop for EdgeStreamer {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::Release);
    }
}

fn stop_stream_best_effort(connection: &Connection) {
    if let Err(err) = connection.stream_stop() {
        xclock_log::warn!("Failed to stop the stream: {}", err);
    }
}

/// Stops the device stream when the acquisition thread leaves its loop.
struct StreamStopGuard<'a>(&'a Connection);

impl Drop for StreamStopGuard<'_> {
    fn drop(&mut self) {
        stop_stream_best_effort(self.0);
    }
}

/// State exclusively owned by the acquisition thread.
struct Acquisition {
    connection: Connection,
    channels: usize,
    timer_words: usize,
    timer_frequency_hz: u32,
    rollover: RolloverState,
    /// Last row of the previous batch, with its raw tick.
    previous_row: Option<Vec<i64>>,
    /// Corrected tick of the first scan, the zero of all timestamps.
    origin_tick: Option<i64>,
    sink: Box<dyn EdgeSink>,
    report: StreamReport,
}

impl Acquisition {
    fn run(mut self, stop_requested: &AtomicBool, ready: &Signal, report_sender: &Sender<StreamReport>) {
        let connection = self.connection.clone();
        {
            let _guard = StreamStopGuard(&connection);
            while !stop_requested.load(Ordering::Acquire) {
                if let Err(err) = self.process_next_batch() {
                    xclock_log::error!("Edge streaming stopped after an error: {}", err);
                    self.report.faulted = true;
                    break;
                }
                ready.raise();
            }
        }
        let report = self.report;
        xclock_log::info!(
            "Edge stream finished: {} batches, {} scans, {} edges, {} skipped samples, {} rollovers, {} anomalies",
            report.batches,
            report.scans,
            report.edges,
            report.skipped_samples,
            report.rollovers,
            report.anomalies
        );
        // the receiving side may have given up waiting
        let _ = report_sender.send(report);
    }

    fn process_next_batch(&mut self) -> Result<()> {
        let read = self.connection.stream_read()?;
        let host_timestamp = host_timestamp_ns();
        xclock_log::diagnostic!(
            "Read {} samples, device backlog {}, host backlog {}",
            read.samples.len(),
            read.device_backlog,
            read.host_backlog
        );

        let mut batch = self.decode(&read.samples)?;
        self.report.batches += 1;
        if batch.is_empty() {
            return Ok(());
        }
        self.report.scans += batch.rows() as u64;
        let last_raw_row = batch.last_row().map(<[i64]>::to_vec);

        let correction = self.rollover.correct(&mut batch);
        self.report.rollovers += correction.rollovers;
        self.report.anomalies += correction.anomalies;

        let edges = detect_edges(&batch, self.channels, self.previous_row.as_deref())?;
        self.previous_row = last_raw_row;
        let Some(first_tick) = batch.tick(0) else {
            return Ok(());
        };
        let origin = *self.origin_tick.get_or_insert(first_tick);
        let records: Vec<EdgeRecord> = edges
            .into_iter()
            .map(|mut edge| {
                edge.timestamp = ticks_to_nanoseconds(edge.timestamp - origin, self.timer_frequency_hz);
                EdgeRecord::new(edge, host_timestamp)
            })
            .collect();
        self.sink.append(&records)?;
        self.report.edges += records.len() as u64;
        Ok(())
    }

    /// Turn the flat sample block into a batch of levels and raw ticks.
    ///
    /// Scans holding a skipped sample are left out.
    fn decode(&mut self, samples: &[f64]) -> Result<SampleBatch> {
        let width = self.channels + self.timer_words;
        if samples.len() % width != 0 {
            return Err(Error::driver(format!(
                "Stream returned {} samples, not a multiple of the scan width {}",
                samples.len(),
                width
            )));
        }
        let mut batch = SampleBatch::new(self.channels + 1);
        let mut row = Vec::with_capacity(self.channels + 1);
        let mut skipped = 0;
        for scan in samples.chunks_exact(width) {
            let skipped_in_scan = scan.iter().filter(|value| **value == SKIPPED_SAMPLE).count();
            if skipped_in_scan > 0 {
                skipped += skipped_in_scan;
                continue;
            }
            let (levels, timer) = scan.split_at(self.channels);
            row.clear();
            row.extend(levels.iter().map(|value| i64::from(*value >= 0.5)));
            row.push(combine_timer_words(timer));
            batch.push_row(&row)?;
        }
        if skipped > 0 {
            xclock_log::warn!("Device skipped {} samples", skipped);
            self.report.skipped_samples += skipped as u64;
        }
        Ok(batch)
    }
}

/// Raw tick from the timer stream words, low word first.
fn combine_timer_words(words: &[f64]) -> i64 {
    words
        .iter()
        .enumerate()
        .map(|(index, word)| (*word as i64) << (16 * index))
        .sum()
}
