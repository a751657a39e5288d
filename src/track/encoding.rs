//! Row and columnar encodings for persisted track records
//!
//! A track's persisted stream is a sequence of MessagePack maps. Each map is
//! either a row record (one logical point, `_ts` is a number) or a columnar
//! block (N points transposed into per-field arrays, `_ts` is an array).
//! The `_ts` shape is the discriminator: appends validate `_ts` as numeric,
//! so a row can never carry an array there.

use serde_json::{Map, Value};

use crate::error::{DreamlakeError, Result};
use crate::value::{FieldMap, TS_FIELD};

/// One record in the persisted stream
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedRecord {
    /// A single logical point
    Row(FieldMap),
    /// N logical points, every value an array of length N
    Block(FieldMap),
}

impl EncodedRecord {
    /// Encode a batch of resolved points using the writer policy: one point
    /// becomes a row, two or more become a single columnar block.
    pub fn from_points(mut points: Vec<FieldMap>) -> Result<Self> {
        match points.len() {
            0 => Err(DreamlakeError::BadInput(
                "data_points cannot be empty".to_string(),
            )),
            1 => Ok(EncodedRecord::Row(points.remove(0))),
            _ => Ok(EncodedRecord::Block(transpose(&points))),
        }
    }

    /// Number of logical points in this record
    pub fn len(&self) -> Result<usize> {
        match self {
            EncodedRecord::Row(_) => Ok(1),
            EncodedRecord::Block(block) => block_len(block),
        }
    }

    /// Expand into logical points, reconstructing rows from block columns
    pub fn expand(&self) -> Result<Vec<FieldMap>> {
        match self {
            EncodedRecord::Row(point) => Ok(vec![point.clone()]),
            EncodedRecord::Block(block) => {
                let n = block_len(block)?;
                let mut points = Vec::with_capacity(n);
                for j in 0..n {
                    let mut point = Map::new();
                    for (key, column) in block {
                        let Value::Array(cells) = column else {
                            return Err(corrupt_column(key));
                        };
                        point.insert(key.clone(), cells[j].clone());
                    }
                    points.push(point);
                }
                Ok(points)
            }
        }
    }

    /// The raw map written to storage
    #[must_use]
    pub fn as_map(&self) -> &FieldMap {
        match self {
            EncodedRecord::Row(map) | EncodedRecord::Block(map) => map,
        }
    }

    /// Classify a map read back from storage.
    ///
    /// A record is a block iff its `_ts` value is an array; all other values
    /// must then be arrays of the same length.
    pub fn classify(map: FieldMap) -> Result<Self> {
        let is_block = matches!(map.get(TS_FIELD), Some(Value::Array(_)));
        if !is_block {
            return Ok(EncodedRecord::Row(map));
        }
        let record = EncodedRecord::Block(map);
        // Validates column shapes up front so readers fail loudly.
        record.len()?;
        Ok(record)
    }
}

/// Transpose points into one columnar block: union of keys, missing cells
/// filled with null.
fn transpose(points: &[FieldMap]) -> FieldMap {
    let mut keys: Vec<&String> = Vec::new();
    // _ts first, then field keys in first-appearance order
    for point in points {
        for key in point.keys() {
            if key != TS_FIELD && !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let mut block = Map::new();
    let ts_column: Vec<Value> = points
        .iter()
        .map(|p| p.get(TS_FIELD).cloned().unwrap_or(Value::Null))
        .collect();
    block.insert(TS_FIELD.to_string(), Value::Array(ts_column));
    for key in keys {
        let column: Vec<Value> = points
            .iter()
            .map(|p| p.get(key).cloned().unwrap_or(Value::Null))
            .collect();
        block.insert(key.clone(), Value::Array(column));
    }
    block
}

fn block_len(block: &FieldMap) -> Result<usize> {
    let Some(Value::Array(ts)) = block.get(TS_FIELD) else {
        return Err(DreamlakeError::Corrupt(
            "columnar block is missing its _ts column".to_string(),
        ));
    };
    let n = ts.len();
    for (key, column) in block {
        match column {
            Value::Array(cells) if cells.len() == n => {}
            _ => return Err(corrupt_column(key)),
        }
    }
    Ok(n)
}

fn corrupt_column(key: &str) -> DreamlakeError {
    DreamlakeError::Corrupt(format!(
        "columnar block column {key:?} is not an array of the block length"
    ))
}

/// Resolved point constructor shared by this module's tests and the buffer tests
#[cfg(test)]
pub(crate) fn point(ts: f64, fields: &[(&str, Value)]) -> FieldMap {
    let mut map = Map::new();
    map.insert(TS_FIELD.to_string(), crate::value::ts_value(ts));
    for (key, value) in fields {
        map.insert((*key).to_string(), value.clone());
    }
    map
}
