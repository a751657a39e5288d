//! In-memory track buffer and merge-by-`_ts`
//!
//! Appends land here first; flush collapses points sharing an exact `_ts`
//! into one merged point. Group order is the order of each group's first
//! appearance in the buffer, and later appends win on conflicting fields.
//! Merging never reaches across a flush boundary.

use crate::value::{FieldMap, TS_FIELD};

/// Pending points for a single track, in append order
#[derive(Debug, Default)]
pub struct TrackBuffer {
    points: Vec<FieldMap>,
}

impl TrackBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered points (before merging)
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append one resolved point (already carrying a numeric `_ts`)
    pub fn push(&mut self, point: FieldMap) {
        self.points.push(point);
    }

    /// Take the buffered points, merged by exact `_ts` equality.
    ///
    /// The buffer is left empty. Callers that fail to persist the result must
    /// [`restore`](Self::restore) it so a retry sees the same points.
    pub fn drain_merged(&mut self) -> Vec<FieldMap> {
        let points = std::mem::take(&mut self.points);
        merge_by_timestamp(points)
    }

    /// Put merged points back after a failed flush, ahead of anything
    /// appended concurrently since the drain.
    pub fn restore(&mut self, mut merged: Vec<FieldMap>) {
        std::mem::swap(&mut self.points, &mut merged);
        self.points.extend(merged);
    }
}

/// Collapse points with identical `_ts` into one, later fields winning.
fn merge_by_timestamp(points: Vec<FieldMap>) -> Vec<FieldMap> {
    let mut merged: Vec<FieldMap> = Vec::with_capacity(points.len());
    for point in points {
        let ts = point.get(TS_FIELD).and_then(serde_json::Value::as_f64);
        let existing = ts.and_then(|ts| {
            merged.iter_mut().find(|p| {
                p.get(TS_FIELD).and_then(serde_json::Value::as_f64) == Some(ts)
            })
        });
        match existing {
            Some(group) => {
                for (key, value) in point {
                    group.insert(key, value);
                }
            }
            None => merged.push(point),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::encoding::point;
    use serde_json::json;

    #[test]
    fn test_distinct_timestamps_pass_through() {
        let mut buffer = TrackBuffer::new();
        buffer.push(point(1.0, &[("a", json!(1))]));
        buffer.push(point(2.0, &[("b", json!(2))]));
        let merged = buffer.drain_merged();
        assert_eq!(merged.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_equal_timestamps_merge_later_wins() {
        let mut buffer = TrackBuffer::new();
        buffer.push(point(1.0, &[("q", json!([0.1, 0.2])), ("v", json!(1))]));
        buffer.push(point(1.0, &[("v", json!(2))]));
        buffer.push(point(1.0, &[("e", json!([0.5, 0.6, 0.7]))]));
        let merged = buffer.drain_merged();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0]["q"], json!([0.1, 0.2]));
        assert_eq!(merged[0]["v"], json!(2));
        assert_eq!(merged[0]["e"], json!([0.5, 0.6, 0.7]));
    }

    #[test]
    fn test_group_order_is_first_appearance() {
        let mut buffer = TrackBuffer::new();
        buffer.push(point(5.0, &[("a", json!(1))]));
        buffer.push(point(1.0, &[("b", json!(2))]));
        buffer.push(point(5.0, &[("c", json!(3))]));
        let merged = buffer.drain_merged();
        // Not sorted by timestamp: 5.0 appeared first
        assert_eq!(merged[0]["_ts"], json!(5.0));
        assert_eq!(merged[1]["_ts"], json!(1.0));
        assert_eq!(merged[0]["c"], json!(3));
    }

    #[test]
    fn test_restore_preserves_order_ahead_of_new_appends() {
        let mut buffer = TrackBuffer::new();
        buffer.push(point(1.0, &[("a", json!(1))]));
        let drained = buffer.drain_merged();
        // A concurrent append lands while the flush is failing
        buffer.push(point(2.0, &[("b", json!(2))]));
        buffer.restore(drained);
        let merged = buffer.drain_merged();
        assert_eq!(merged[0]["_ts"], json!(1.0));
        assert_eq!(merged[1]["_ts"], json!(2.0));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::track::encoding::point;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_merged_timestamps_unique(
            raw in prop::collection::vec((0u8..6, any::<i32>()), 0..40)
        ) {
            let mut buffer = TrackBuffer::new();
            for (ts, v) in &raw {
                buffer.push(point(f64::from(*ts), &[("v", json!(v))]));
            }
            let merged = buffer.drain_merged();
            let mut seen = Vec::new();
            for p in &merged {
                let ts = p["_ts"].as_f64().unwrap();
                prop_assert!(!seen.contains(&ts.to_bits()));
                seen.push(ts.to_bits());
            }
        }

        #[test]
        fn prop_last_write_wins_per_timestamp(
            raw in prop::collection::vec((0u8..4, any::<i32>()), 1..40)
        ) {
            let mut buffer = TrackBuffer::new();
            for (ts, v) in &raw {
                buffer.push(point(f64::from(*ts), &[("v", json!(v))]));
            }
            let merged = buffer.drain_merged();
            for p in merged {
                let ts = p["_ts"].as_f64().unwrap();
                let last = raw
                    .iter()
                    .rev()
                    .find(|(t, _)| f64::from(*t) == ts)
                    .map(|(_, v)| *v)
                    .unwrap();
                prop_assert_eq!(p["v"].clone(), json!(last));
            }
        }
    }
}
