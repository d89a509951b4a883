//! Compact binary encoding of requests and edge rows.
//!
//! Integers are big-endian; byte strings and strings are `u32` length
//! prefixed; optional values carry a one-byte presence flag. A decoded
//! payload must be consumed exactly, trailing bytes are corruption.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use crate::error::{ChainError, Result};
use crate::types::{EdgeKey, EdgeVersion, PropValue};

use super::request::{AddEdgesRequest, DeleteEdgesRequest, NewEdge, UpdateEdgeRequest, UpdatedProp};

const PROP_NULL: u8 = 0;
const PROP_BOOL: u8 = 1;
const PROP_INT: u8 = 2;
const PROP_FLOAT: u8 = 3;
const PROP_STR: u8 = 4;
const PROP_TIMESTAMP: u8 = 5;

/// Types with a compact binary form.
pub trait CompactCodec: Sized {
    /// Appends the encoded form to `out`.
    fn encode_to(&self, out: &mut Vec<u8>);

    /// Decodes one value from the front of `buf`, advancing it.
    fn decode_from(buf: &mut &[u8]) -> Result<Self>;

    /// Encodes into a fresh buffer.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    /// Decodes a buffer holding exactly one value.
    fn decode(mut buf: &[u8]) -> Result<Self> {
        let value = Self::decode_from(&mut buf)?;
        if buf.has_remaining() {
            return Err(ChainError::Decode("trailing bytes after payload"));
        }
        Ok(value)
    }
}

fn need(buf: &&[u8], n: usize, what: &'static str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ChainError::Decode(what));
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1, "u8 truncated")?;
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4, "u32 truncated")?;
    Ok(buf.get_u32())
}

fn get_i32(buf: &mut &[u8]) -> Result<i32> {
    need(buf, 4, "i32 truncated")?;
    Ok(buf.get_i32())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    need(buf, 8, "i64 truncated")?;
    Ok(buf.get_i64())
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.put_u32(bytes.len() as u32);
    out.put_slice(bytes);
}

fn get_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    need(buf, len, "byte string truncated")?;
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}

fn get_string(buf: &mut &[u8]) -> Result<String> {
    String::from_utf8(get_bytes(buf)?).map_err(|_| ChainError::Decode("string is not UTF-8"))
}

fn get_bool(buf: &mut &[u8]) -> Result<bool> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ChainError::Decode("invalid bool")),
    }
}

fn put_version(out: &mut Vec<u8>, version: Option<EdgeVersion>) {
    match version {
        Some(v) => {
            out.put_u8(1);
            out.put_i64(v);
        }
        None => out.put_u8(0),
    }
}

fn get_version(buf: &mut &[u8]) -> Result<Option<EdgeVersion>> {
    if get_bool(buf)? {
        Ok(Some(get_i64(buf)?))
    } else {
        Ok(None)
    }
}

fn get_count(buf: &mut &[u8], min_item_len: usize) -> Result<usize> {
    let count = get_u32(buf)? as usize;
    // Reject counts that cannot possibly fit, before allocating.
    if count.saturating_mul(min_item_len) > buf.remaining() {
        return Err(ChainError::Decode("element count exceeds payload"));
    }
    Ok(count)
}

impl CompactCodec for PropValue {
    fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            PropValue::Null => out.put_u8(PROP_NULL),
            PropValue::Bool(v) => {
                out.put_u8(PROP_BOOL);
                out.put_u8(u8::from(*v));
            }
            PropValue::Int(v) => {
                out.put_u8(PROP_INT);
                out.put_i64(*v);
            }
            PropValue::Float(v) => {
                out.put_u8(PROP_FLOAT);
                out.put_f64(*v);
            }
            PropValue::Str(v) => {
                out.put_u8(PROP_STR);
                put_bytes(out, v.as_bytes());
            }
            PropValue::Timestamp(v) => {
                out.put_u8(PROP_TIMESTAMP);
                out.put_i64(*v);
            }
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        match get_u8(buf)? {
            PROP_NULL => Ok(PropValue::Null),
            PROP_BOOL => Ok(PropValue::Bool(get_bool(buf)?)),
            PROP_INT => Ok(PropValue::Int(get_i64(buf)?)),
            PROP_FLOAT => {
                need(buf, 8, "f64 truncated")?;
                Ok(PropValue::Float(buf.get_f64()))
            }
            PROP_STR => Ok(PropValue::Str(get_string(buf)?)),
            PROP_TIMESTAMP => Ok(PropValue::Timestamp(get_i64(buf)?)),
            _ => Err(ChainError::Decode("unknown property tag")),
        }
    }
}

impl CompactCodec for EdgeKey {
    fn encode_to(&self, out: &mut Vec<u8>) {
        put_bytes(out, &self.src);
        out.put_i32(self.edge_type);
        out.put_i64(self.ranking);
        put_bytes(out, &self.dst);
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let src = get_bytes(buf)?;
        let edge_type = get_i32(buf)?;
        let ranking = get_i64(buf)?;
        let dst = get_bytes(buf)?;
        Ok(EdgeKey {
            src,
            edge_type,
            ranking,
            dst,
        })
    }
}

fn put_props(out: &mut Vec<u8>, props: &[PropValue]) {
    out.put_u32(props.len() as u32);
    for prop in props {
        prop.encode_to(out);
    }
}

fn get_props(buf: &mut &[u8]) -> Result<Vec<PropValue>> {
    let count = get_count(buf, 1)?;
    (0..count).map(|_| PropValue::decode_from(buf)).collect()
}

impl CompactCodec for AddEdgesRequest {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.put_i32(self.space_id);
        out.put_u8(u8::from(self.if_not_exists));
        put_version(out, self.version);
        out.put_u32(self.prop_names.len() as u32);
        for name in &self.prop_names {
            put_bytes(out, name.as_bytes());
        }
        out.put_u32(self.parts.len() as u32);
        for (part, edges) in &self.parts {
            out.put_u32(*part);
            out.put_u32(edges.len() as u32);
            for edge in edges {
                edge.key.encode_to(out);
                put_props(out, &edge.props);
            }
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let space_id = get_i32(buf)?;
        let if_not_exists = get_bool(buf)?;
        let version = get_version(buf)?;
        let name_count = get_count(buf, 4)?;
        let prop_names = (0..name_count)
            .map(|_| get_string(buf))
            .collect::<Result<Vec<_>>>()?;
        let part_count = get_count(buf, 8)?;
        let mut parts = BTreeMap::new();
        for _ in 0..part_count {
            let part = get_u32(buf)?;
            let edge_count = get_count(buf, 4 + 4 + 8 + 4 + 4)?;
            let mut edges = Vec::with_capacity(edge_count);
            for _ in 0..edge_count {
                let key = EdgeKey::decode_from(buf)?;
                let props = get_props(buf)?;
                edges.push(NewEdge { key, props });
            }
            parts.insert(part, edges);
        }
        Ok(AddEdgesRequest {
            space_id,
            parts,
            prop_names,
            if_not_exists,
            version,
        })
    }
}

impl CompactCodec for UpdateEdgeRequest {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.put_i32(self.space_id);
        out.put_u32(self.part_id);
        self.edge_key.encode_to(out);
        out.put_u8(u8::from(self.insertable));
        put_version(out, self.version);
        out.put_u32(self.updated_props.len() as u32);
        for prop in &self.updated_props {
            put_bytes(out, prop.name.as_bytes());
            prop.value.encode_to(out);
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let space_id = get_i32(buf)?;
        let part_id = get_u32(buf)?;
        let edge_key = EdgeKey::decode_from(buf)?;
        let insertable = get_bool(buf)?;
        let version = get_version(buf)?;
        let count = get_count(buf, 5)?;
        let mut updated_props = Vec::with_capacity(count);
        for _ in 0..count {
            let name = get_string(buf)?;
            let value = PropValue::decode_from(buf)?;
            updated_props.push(UpdatedProp { name, value });
        }
        Ok(UpdateEdgeRequest {
            space_id,
            part_id,
            edge_key,
            updated_props,
            insertable,
            version,
        })
    }
}

impl CompactCodec for DeleteEdgesRequest {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.put_i32(self.space_id);
        out.put_u32(self.parts.len() as u32);
        for (part, keys) in &self.parts {
            out.put_u32(*part);
            out.put_u32(keys.len() as u32);
            for key in keys {
                key.encode_to(out);
            }
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let space_id = get_i32(buf)?;
        let part_count = get_count(buf, 8)?;
        let mut parts = BTreeMap::new();
        for _ in 0..part_count {
            let part = get_u32(buf)?;
            let key_count = get_count(buf, 4 + 4 + 8 + 4)?;
            let keys = (0..key_count)
                .map(|_| EdgeKey::decode_from(buf))
                .collect::<Result<Vec<_>>>()?;
            parts.insert(part, keys);
        }
        Ok(DeleteEdgesRequest { space_id, parts })
    }
}

/// Stored value of an edge record.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRow {
    /// Write version of the row.
    pub version: EdgeVersion,
    /// Column values in schema order.
    pub props: Vec<PropValue>,
}

impl CompactCodec for EdgeRow {
    fn encode_to(&self, out: &mut Vec<u8>) {
        out.put_i64(self.version);
        out.put_u16(self.props.len() as u16);
        for prop in &self.props {
            prop.encode_to(out);
        }
    }

    fn decode_from(buf: &mut &[u8]) -> Result<Self> {
        let version = get_i64(buf)?;
        need(buf, 2, "column count truncated")?;
        let count = buf.get_u16() as usize;
        let props = (0..count)
            .map(|_| PropValue::decode_from(buf))
            .collect::<Result<Vec<_>>>()?;
        Ok(EdgeRow { version, props })
    }
}
