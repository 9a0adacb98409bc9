// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Destinations for recorded edge rows.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::edges::EdgeEvent;
use crate::error::{Error, Result};

/// One persisted edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Nanoseconds since the first scan of the session.
    pub timestamp_ns: i64,
    /// 1-based channel index, positive for rising and negative for falling edges.
    pub channel_code: i32,
    /// Host wall clock at the time the batch was read, nanoseconds since the Unix epoch.
    pub host_timestamp_ns: i64,
}

impl EdgeRecord {
    pub fn new(event: EdgeEvent, host_timestamp_ns: i64) -> Self {
        EdgeRecord {
            timestamp_ns: event.timestamp,
            channel_code: event.channel_code,
            host_timestamp_ns,
        }
    }
}

/// Receives the edge rows of each processed batch, in order.
pub trait EdgeSink: Send {
    fn append(&mut self, records: &[EdgeRecord]) -> Result<()>;
}

/// Comma separated rows without header, flushed after every batch.
#[derive(Debug)]
pub struct CsvEdgeSink<W: Write> {
    writer: W,
    rows: usize,
}

impl CsvEdgeSink<BufWriter<File>> {
    /// Create (or truncate) `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(CsvEdgeSink::new(BufWriter::new(file)))
    }
}

impl<W: Write> CsvEdgeSink<W> {
    pub fn new(writer: W) -> Self {
        CsvEdgeSink { writer, rows: 0 }
    }

    /// Number of rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EdgeSink for CsvEdgeSink<W> {
    fn append(&mut self, records: &[EdgeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            writeln!(
                self.writer,
                "{},{},{}",
                record.timestamp_ns, record.channel_code, record.host_timestamp_ns
            )?;
        }
        self.writer.flush()?;
        self.rows += records.len();
        Ok(())
    }
}

/// Parse rows written by [`CsvEdgeSink`].
pub fn read_edge_csv(path: &Path) -> Result<Vec<EdgeRecord>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_row)
        .collect()
}

fn parse_row(line: &str) -> Result<EdgeRecord> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let [timestamp, channel, host] = fields.as_slice() else {
        return Err(Error::new(format!("Malformed edge row '{line}'")));
    };
    let parse_error = |err: std::num::ParseIntError| Error::new(format!("Malformed edge row '{line}': {err}"));
    Ok(EdgeRecord {
        timestamp_ns: timestamp.parse().map_err(parse_error)?,
        channel_code: channel.parse().map_err(parse_error)?,
        host_timestamp_ns: host.parse().map_err(parse_error)?,
    })
}

/// Forwards every non-empty batch to an in-process consumer.
#[derive(Debug, Clone)]
pub struct ChannelEdgeSink {
    sender: Sender<Vec<EdgeRecord>>,
}

impl ChannelEdgeSink {
    pub fn new(sender: Sender<Vec<EdgeRecord>>) -> Self {
        ChannelEdgeSink { sender }
    }
}

impl EdgeSink for ChannelEdgeSink {
    fn append(&mut self, records: &[EdgeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.sender
            .send(records.to_vec())
            .map_err(|_| Error::new("Edge consumer disconnected"))
    }
}

/// Target of a recording: a CSV file or an in-process channel.
#[derive(Debug, Clone)]
pub enum SinkTarget {
    File(PathBuf),
    Channel(Sender<Vec<EdgeRecord>>),
}

impl SinkTarget {
    pub fn open(&self) -> Result<Box<dyn EdgeSink>> {
        match self {
            SinkTarget::File(path) => Ok(Box::new(CsvEdgeSink::create(path)?)),
            SinkTarget::Channel(sender) => Ok(Box::new(ChannelEdgeSink::new(sender.clone()))),
        }
    }
}
