use crate::catalog::schema::{NullOrdering, SortOrder};
use crate::catalog::types::Value;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

const NULL_FIRST_MARKER: u8 = 0x00;
const PRESENT_MARKER: u8 = 0x01;
const NULL_LAST_MARKER: u8 = 0x02;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncodedKey {
    bytes: SmallVec<[u8; 64]>,
}

impl EncodedKey {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Ascending encoding with NULL sorting last; used for primary keys.
    pub fn from_values(values: &[Value]) -> Self {
        let mut out = SmallVec::<[u8; 64]>::new();
        for value in values {
            encode_value(value, &mut out);
        }
        Self { bytes: out }
    }

    pub fn from_single(value: &Value) -> Self {
        Self::from_values(std::slice::from_ref(value))
    }
}

/// Builds a composite key column by column, each with its own sort order and
/// null placement.
#[derive(Debug, Default)]
pub struct KeyEncoder {
    bytes: SmallVec<[u8; 64]>,
}

impl KeyEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ordered(&mut self, value: &Value, order: SortOrder, nulls: NullOrdering) {
        if value.is_null() {
            self.bytes.push(match nulls {
                NullOrdering::First => NULL_FIRST_MARKER,
                NullOrdering::Last => NULL_LAST_MARKER,
            });
            return;
        }
        self.bytes.push(PRESENT_MARKER);
        let start = self.bytes.len();
        encode_value(value, &mut self.bytes);
        if order == SortOrder::Desc {
            // Every payload encoding is prefix-free, so complementing the
            // bytes reverses the order.
            for byte in &mut self.bytes[start..] {
                *byte = !*byte;
            }
        }
    }

    pub fn push_key(&mut self, key: &EncodedKey) {
        self.bytes.extend_from_slice(key.as_slice());
    }

    pub fn finish(self) -> EncodedKey {
        EncodedKey { bytes: self.bytes }
    }
}

pub fn prefix_successor(prefix: &EncodedKey) -> Option<EncodedKey> {
    let mut next = prefix.bytes.clone();
    for i in (0..next.len()).rev() {
        if next[i] != 0xFF {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(EncodedKey { bytes: next });
        }
    }
    None
}

fn encode_value(v: &Value, out: &mut SmallVec<[u8; 64]>) {
    match v {
        Value::Integer(i) => {
            out.push(0x10);
            let shifted = (*i as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        Value::Timestamp(ts) => {
            out.push(0x11);
            let shifted = (*ts as u64) ^ 0x8000_0000_0000_0000;
            out.extend_from_slice(&shifted.to_be_bytes());
        }
        Value::Text(s) => {
            out.push(0x14);
            append_escaped(s.as_bytes(), out);
        }
        Value::Boolean(b) => {
            out.push(0x16);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Float(f) => {
            out.push(0x17);
            let bits = f.to_bits();
            let mapped = if (bits >> 63) == 1 {
                !bits
            } else {
                bits ^ 0x8000_0000_0000_0000
            };
            out.extend_from_slice(&mapped.to_be_bytes());
        }
        Value::Blob(b) => {
            out.push(0x18);
            append_escaped(b, out);
        }
        Value::Null => {
            out.push(0xFF);
        }
    }
}

fn append_escaped(bytes: &[u8], out: &mut SmallVec<[u8; 64]>) {
    for byte in bytes {
        if *byte == 0 {
            // Escape interior nulls so terminator remains unambiguous.
            out.extend_from_slice(&[0x00, 0xFF]);
        } else {
            out.push(*byte);
        }
    }
    out.extend_from_slice(&[0x00, 0x00]);
}
