//! Deterministic snapshot format.
//!
//! ```text
//! | magic "VLSN" (4) | version (1) | metric_code (1) | strategy_code (1) |
//! | dim (u16) | count (u32) | flags (u8) | snapshot_id (u64) |
//! | ids (u32 * count) | vectors (f32 * count * dim) | metas (len-prefixed) |
//! | ann_state (u32 len + bytes) | attrs_state (u32 len + bytes) |
//! ```
//!
//! Encoding is a pure function of engine state: map sections are written in
//! sorted key order. The decoder validates the magic, version, enum codes,
//! and every section length; any disagreement is `CorruptSnapshot`.

use crate::ann::AnnIndex;
use crate::attrs::AttributeIndex;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use roaring::RoaringBitmap;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use vectorlite_core::{
    metric_codec, strategy_codec, AnnStrategy, Metric, Result, VectorLiteError,
};
use vectorlite_store::encoding::{read_meta, read_str, write_meta, write_str};
use vectorlite_store::VectorStore;

pub const SNAP_MAGIC: [u8; 4] = *b"VLSN";
pub const SNAP_VERSION: u8 = 1;

#[derive(Debug)]
pub struct DecodedSnapshot {
    pub store: VectorStore,
    pub ann: AnnIndex,
    pub attrs: AttributeIndex,
    pub snapshot_id: u64,
}

pub fn encode(
    store: &VectorStore,
    ann: &AnnIndex,
    attrs: &AttributeIndex,
    snapshot_id: u64,
) -> Result<Vec<u8>> {
    let corrupt = |e: io::Error| VectorLiteError::Storage(e.to_string());
    let mut buf = Vec::new();

    buf.extend_from_slice(&SNAP_MAGIC);
    buf.push(SNAP_VERSION);
    buf.push(metric_codec().encode(store.metric().label())?);
    buf.push(strategy_codec().encode(ann.strategy().label())?);
    buf.write_u16::<LittleEndian>(store.dim() as u16)
        .map_err(corrupt)?;
    buf.write_u32::<LittleEndian>(store.count() as u32)
        .map_err(corrupt)?;
    buf.push(0); // flags
    buf.write_u64::<LittleEndian>(snapshot_id).map_err(corrupt)?;

    for &id in store.ids() {
        buf.write_u32::<LittleEndian>(id).map_err(corrupt)?;
    }
    for slot in 0..store.count() {
        for &v in store.vector_at(slot) {
            buf.write_f32::<LittleEndian>(v).map_err(corrupt)?;
        }
    }
    for slot in 0..store.count() {
        write_meta(&mut buf, store.meta_at(slot)).map_err(corrupt)?;
    }

    let ann_state = ann.encode()?;
    buf.write_u32::<LittleEndian>(ann_state.len() as u32)
        .map_err(corrupt)?;
    buf.extend_from_slice(&ann_state);

    let attrs_state = encode_attrs(attrs).map_err(corrupt)?;
    buf.write_u32::<LittleEndian>(attrs_state.len() as u32)
        .map_err(corrupt)?;
    buf.extend_from_slice(&attrs_state);

    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<DecodedSnapshot> {
    let corrupt = |reason: &str| VectorLiteError::CorruptSnapshot(reason.to_string());
    let io_corrupt = |e: io::Error| VectorLiteError::CorruptSnapshot(e.to_string());

    let mut cur = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(io_corrupt)?;
    if magic != SNAP_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = cur.read_u8().map_err(io_corrupt)?;
    if version != SNAP_VERSION {
        return Err(VectorLiteError::CorruptSnapshot(format!(
            "unsupported version {version}"
        )));
    }
    let metric = Metric::from_label(metric_codec().decode(cur.read_u8().map_err(io_corrupt)?)?)
        .map_err(|e| VectorLiteError::CorruptSnapshot(e.to_string()))?;
    let strategy =
        AnnStrategy::from_label(strategy_codec().decode(cur.read_u8().map_err(io_corrupt)?)?)
            .map_err(|e| VectorLiteError::CorruptSnapshot(e.to_string()))?;
    let dim = cur.read_u16::<LittleEndian>().map_err(io_corrupt)?;
    if dim == 0 {
        return Err(corrupt("zero dimension"));
    }
    let count = cur.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
    let _flags = cur.read_u8().map_err(io_corrupt)?;
    let snapshot_id = cur.read_u64::<LittleEndian>().map_err(io_corrupt)?;

    let remaining = bytes.len() as u64 - cur.position();
    let fixed_body = (count * 4 + count * usize::from(dim) * 4) as u64;
    if remaining < fixed_body {
        return Err(corrupt("payload shorter than dim*count sections"));
    }

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(cur.read_u32::<LittleEndian>().map_err(io_corrupt)?);
    }
    let mut vectors = Vec::with_capacity(count * usize::from(dim));
    for _ in 0..count * usize::from(dim) {
        vectors.push(cur.read_f32::<LittleEndian>().map_err(io_corrupt)?);
    }
    let mut metas = Vec::with_capacity(count);
    for _ in 0..count {
        metas.push(read_meta(&mut cur).map_err(io_corrupt)?);
    }

    let store = VectorStore::from_parts(dim, metric, ids, vectors, metas)?;

    let ann_len = cur.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
    let mut ann_state = vec![0u8; ann_len];
    cur.read_exact(&mut ann_state).map_err(io_corrupt)?;
    let ann = AnnIndex::decode(strategy, &ann_state)?;

    let attrs_len = cur.read_u32::<LittleEndian>().map_err(io_corrupt)? as usize;
    let mut attrs_state = vec![0u8; attrs_len];
    cur.read_exact(&mut attrs_state).map_err(io_corrupt)?;
    let attrs = decode_attrs(&attrs_state, &store).map_err(io_corrupt)?;

    if cur.position() != bytes.len() as u64 {
        return Err(corrupt("trailing bytes after attrs section"));
    }

    Ok(DecodedSnapshot {
        store,
        ann,
        attrs,
        snapshot_id,
    })
}

fn write_bitmap(buf: &mut Vec<u8>, set: &RoaringBitmap) -> io::Result<()> {
    let mut bytes = Vec::new();
    set.serialize_into(&mut bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
    buf.extend_from_slice(&bytes);
    Ok(())
}

fn read_bitmap(cur: &mut Cursor<&[u8]>) -> io::Result<RoaringBitmap> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    cur.read_exact(&mut bytes)?;
    RoaringBitmap::deserialize_from(&bytes[..])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn encode_attrs(attrs: &AttributeIndex) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();

    let mut eq_keys: Vec<&String> = attrs.eq_map().keys().collect();
    eq_keys.sort();
    buf.write_u32::<LittleEndian>(eq_keys.len() as u32)?;
    for key in eq_keys {
        write_str(&mut buf, key)?;
        let tags = &attrs.eq_map()[key];
        let mut tag_keys: Vec<&String> = tags.keys().collect();
        tag_keys.sort();
        buf.write_u32::<LittleEndian>(tag_keys.len() as u32)?;
        for tag in tag_keys {
            write_str(&mut buf, tag)?;
            write_bitmap(&mut buf, &tags[tag])?;
        }
    }

    let mut exists_keys: Vec<&String> = attrs.exists_map().keys().collect();
    exists_keys.sort();
    buf.write_u32::<LittleEndian>(exists_keys.len() as u32)?;
    for key in exists_keys {
        write_str(&mut buf, key)?;
        write_bitmap(&mut buf, &attrs.exists_map()[key])?;
    }

    let mut num_keys: Vec<&String> = attrs.numeric_keys().collect();
    num_keys.sort();
    buf.write_u32::<LittleEndian>(num_keys.len() as u32)?;
    for key in num_keys {
        write_str(&mut buf, key)?;
        let entries = attrs.sorted_numeric(key).unwrap_or_default();
        buf.write_u32::<LittleEndian>(entries.len() as u32)?;
        for (value, id) in entries {
            buf.write_f64::<LittleEndian>(value)?;
            buf.write_u32::<LittleEndian>(id)?;
        }
    }

    Ok(buf)
}

fn decode_attrs(bytes: &[u8], store: &VectorStore) -> io::Result<AttributeIndex> {
    let mut cur = Cursor::new(bytes);
    let mut attrs = AttributeIndex::new();

    let eq_keys = cur.read_u32::<LittleEndian>()? as usize;
    for _ in 0..eq_keys {
        let key = read_str(&mut cur)?;
        let ntags = cur.read_u32::<LittleEndian>()? as usize;
        let mut tags = HashMap::with_capacity(ntags);
        for _ in 0..ntags {
            let tag = read_str(&mut cur)?;
            tags.insert(tag, read_bitmap(&mut cur)?);
        }
        attrs.restore_eq(key, tags);
    }

    let exists_keys = cur.read_u32::<LittleEndian>()? as usize;
    for _ in 0..exists_keys {
        let key = read_str(&mut cur)?;
        let set = read_bitmap(&mut cur)?;
        attrs.restore_exists(key, set);
    }

    let num_keys = cur.read_u32::<LittleEndian>()? as usize;
    for _ in 0..num_keys {
        let key = read_str(&mut cur)?;
        let n = cur.read_u32::<LittleEndian>()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            let value = cur.read_f64::<LittleEndian>()?;
            let id = cur.read_u32::<LittleEndian>()?;
            entries.push((value, id));
        }
        attrs.restore_numeric(key, entries);
    }

    if cur.position() != bytes.len() as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes in attrs section",
        ));
    }

    // The per-id attribute sets are derived from the stored metas; rebuild
    // them so later set_attrs/remove_id calls can retract correctly.
    for (id, _, meta) in store.iter() {
        if let Some(Value::Object(map)) = meta {
            attrs.restore_forward(id, map.clone());
        }
    }

    Ok(attrs)
}
