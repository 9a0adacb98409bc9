// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::batch::SampleBatch;
use crate::error::{Error, Result};

/// A level transition on one monitored channel.
///
/// `channel_code` is the 1-based channel index, positive for a rising and
/// negative for a falling edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeEvent {
    pub timestamp: i64,
    pub channel_code: i32,
}

impl EdgeEvent {
    pub fn rising(timestamp: i64, channel_index: usize) -> Self {
        EdgeEvent {
            timestamp,
            channel_code: channel_index as i32 + 1,
        }
    }

    pub fn falling(timestamp: i64, channel_index: usize) -> Self {
        EdgeEvent {
            timestamp,
            channel_code: -(channel_index as i32 + 1),
        }
    }

    pub fn is_rising(&self) -> bool {
        self.channel_code > 0
    }

    /// 0-based index of the channel the edge was detected on.
    pub fn channel_index(&self) -> usize {
        self.channel_code.unsigned_abs() as usize - 1
    }
}

/// Detect rising and falling edges in the first `channels` columns of `batch`.
///
/// The trailing column of `batch` supplies the timestamp of each edge. The
/// first row is compared against `prepend` (the last row of the previous
/// batch) if given, otherwise it cannot produce an edge.
///
/// Edges are built channel by channel, rising before falling, and then
/// stable-sorted by timestamp, so simultaneous edges keep that order.
pub fn detect_edges(
    batch: &SampleBatch,
    channels: usize,
    prepend: Option<&[i64]>,
) -> Result<Vec<EdgeEvent>> {
    if channels >= batch.columns() {
        return Err(Error::InvalidParameter(format!(
            "Cannot detect edges on {} channels in a batch of {} columns",
            channels,
            batch.columns()
        )));
    }
    if let Some(previous) = prepend
        && previous.len() < channels
    {
        return Err(Error::InvalidParameter(format!(
            "Prepended row has {} values, expected at least {}",
            previous.len(),
            channels
        )));
    }

    let mut edges = Vec::new();
    for channel in 0..channels {
        let deltas = || transitions(batch, channel, prepend);
        edges.extend(
            deltas()
                .filter(|&(_, delta)| delta == 1)
                .map(|(tick, _)| EdgeEvent::rising(tick, channel)),
        );
        edges.extend(
            deltas()
                .filter(|&(_, delta)| delta == -1)
                .map(|(tick, _)| EdgeEvent::falling(tick, channel)),
        );
    }
    edges.sort_by_key(|edge| edge.timestamp);
    Ok(edges)
}

/// Yields `(tick, level difference to previous row)` for each row that has a
/// predecessor.
fn transitions<'a>(
    batch: &'a SampleBatch,
    channel: usize,
    prepend: Option<&'a [i64]>,
) -> impl Iterator<Item = (i64, i64)> + 'a {
    let first = prepend.into_iter().map(move |previous| previous[channel]);
    let previous_levels = first.chain(batch.iter_rows().map(move |row| row[channel]));
    let skip = usize::from(prepend.is_none());
    batch
        .iter_rows()
        .skip(skip)
        .zip(previous_levels)
        .map(move |(row, previous)| (row[row.len() - 1], row[channel] - previous))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rows(edges: &[EdgeEvent]) -> Vec<[i64; 2]> {
        edges
            .iter()
            .map(|edge| [edge.timestamp, i64::from(edge.channel_code)])
            .collect()
    }

    fn detect(data: &[&[i64]], channels: usize) -> Vec<[i64; 2]> {
        let batch = SampleBatch::from_rows(data).unwrap();
        rows(&detect_edges(&batch, channels, None).unwrap())
    }

    #[test]
    fn test_single_rising_edge() {
        let edges = detect(&[&[0, 0], &[0, 1], &[1, 2], &[1, 3]], 1);
        assert_eq!(edges, vec![[2, 1]]);
    }

    #[test]
    fn test_single_falling_edge() {
        let edges = detect(&[&[1, 0], &[1, 1], &[0, 2], &[0, 3]], 1);
        assert_eq!(edges, vec![[2, -1]]);
    }

    #[test]
    fn test_rising_and_falling_edges_multiple_channels() {
        let edges = detect(
            &[
                &[0, 0, 0],
                &[1, 0, 1],
                &[1, 1, 2],
                &[0, 1, 3],
                &[0, 0, 4],
            ],
            2,
        );
        assert_eq!(edges, vec![[1, 1], [2, 2], [3, -1], [4, -2]]);
    }

    #[test]
    fn test_no_edges() {
        let edges = detect(&[&[0, 0, 0], &[0, 0, 1], &[0, 0, 2]], 2);
        assert!(edges.is_empty());
    }

    #[test]
    fn test_with_prepend() {
        let batch = SampleBatch::from_rows(&[[1, 5], [1, 6]]).unwrap();
        let edges = detect_edges(&batch, 1, Some(&[0, 4][..])).unwrap();
        assert_eq!(rows(&edges), vec![[5, 1]]);

        // without the previous row the boundary edge is invisible
        assert!(detect_edges(&batch, 1, None).unwrap().is_empty());
    }

    #[test]
    fn test_unsorted_edges_are_sorted_by_timestamp() {
        let edges = detect(&[&[0, 0, 0], &[0, 1, 1], &[1, 1, 2]], 2);
        assert_eq!(edges, vec![[1, 2], [2, 1]]);
    }

    #[test]
    fn test_multiple_edges_same_timestamp() {
        let edges = detect(&[&[0, 0, 0], &[1, 1, 1]], 2);
        assert_eq!(edges, vec![[1, 1], [1, 2]]);
    }

    #[test]
    fn test_simultaneous_rising_and_falling() {
        // channel 1 falls while channel 2 rises at the same tick
        let edges = detect(&[&[1, 0, 7], &[0, 1, 8]], 2);
        assert_eq!(edges, vec![[8, -1], [8, 2]]);
    }

    #[test]
    fn test_tick_range_is_not_assumed() {
        let edges = detect(&[&[0, -5], &[1, i64::MAX]], 1);
        assert_eq!(edges, vec![[i64::MAX, 1]]);
    }

    #[test]
    fn test_invalid_shapes() {
        let batch = SampleBatch::from_rows(&[[0, 0]]).unwrap();
        assert!(detect_edges(&batch, 2, None).is_err());
        assert!(detect_edges(&batch, 1, Some(&[][..])).is_err());
    }

    #[test]
    fn test_edge_accessors() {
        let edge = EdgeEvent::falling(10, 2);
        assert_eq!(edge.channel_code, -3);
        assert_eq!(edge.channel_index(), 2);
        assert!(!edge.is_rising());
    }

    proptest! {
        #[test]
        fn prop_edges_are_ordered(levels in prop::collection::vec((0i64..2, 0i64..2, 0i64..3), 1..64)) {
            // ticks may repeat to exercise tie ordering
            let mut tick = 0;
            let data: Vec<[i64; 3]> = levels
                .iter()
                .map(|&(a, b, step)| {
                    tick += step;
                    [a, b, tick]
                })
                .collect();
            let batch = SampleBatch::from_rows(&data).unwrap();
            let edges = detect_edges(&batch, 2, None).unwrap();
            for pair in edges.windows(2) {
                let key = |edge: &EdgeEvent| {
                    (edge.timestamp, edge.channel_index(), !edge.is_rising())
                };
                prop_assert!(pair[0].timestamp <= pair[1].timestamp);
                if pair[0].timestamp == pair[1].timestamp && pair[0].channel_index() != pair[1].channel_index() {
                    prop_assert!(key(&pair[0]) < key(&pair[1]));
                }
            }
            let changes: usize = (1..data.len())
                .map(|i| usize::from(data[i][0] != data[i - 1][0]) + usize::from(data[i][1] != data[i - 1][1]))
                .sum();
            prop_assert_eq!(edges.len(), changes);
        }
    }
}
