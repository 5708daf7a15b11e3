//! Message and forward packet shapes.
//!
//! Two shapes are understood:
//! - Message: `[tag, time, data]`
//! - Forward: `[tag, [[time, data], [time, data], ...]]`

use rmpv::Value;
use serde::Serialize;

use crate::protocol::codec::ProtocolError;

/// A decoded packet, reduced to its tag and the data items it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub tag: String,
    pub entries: Vec<Value>,
}

impl Packet {
    /// Interpret a decoded object as a message or forward packet.
    ///
    /// Returns `None` for objects of any other shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let tag = items.first()?.as_str()?.to_string();

        match items.len() {
            3 => Some(Self {
                tag,
                entries: vec![items[2].clone()],
            }),
            2 => {
                let entries = items[1]
                    .as_array()?
                    .iter()
                    .filter_map(|entry| entry.as_array().and_then(|pair| pair.get(1)).cloned())
                    .collect();
                Some(Self { tag, entries })
            }
            _ => None,
        }
    }

    /// Iterate `(tag, data)` pairs in packet order.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        let tag = self.tag;
        self.entries.into_iter().map(move |data| (tag.clone(), data))
    }
}

/// Encode a single message packet `[tag, time, data]`.
///
/// Structs inside `data` are written as maps so field names survive.
pub fn encode_message<T: Serialize>(tag: &str, time: i64, data: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec_named(&(tag, time, data)).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Encode a forward packet `[tag, [[time, data], ...]]`.
pub fn encode_forward<T: Serialize>(tag: &str, entries: &[(i64, T)]) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec_named(&(tag, entries)).map_err(|e| ProtocolError::Encode(e.to_string()))
}
