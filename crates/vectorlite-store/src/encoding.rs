//! Little-endian primitives shared by the WAL and snapshot codecs.
//!
//! Meta values are length-prefixed UTF-8 JSON. `u32::MAX` in the length
//! slot means "no meta", which keeps a literal JSON `null` representable.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_json::Value;
use std::io::{self, Read};

pub const NO_META: u32 = u32::MAX;

pub fn write_meta(buf: &mut Vec<u8>, meta: Option<&Value>) -> io::Result<()> {
    match meta {
        Some(value) => {
            let bytes = serde_json::to_vec(value)?;
            if bytes.len() as u64 >= u64::from(NO_META) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "meta value too large",
                ));
            }
            buf.write_u32::<LittleEndian>(bytes.len() as u32)?;
            buf.extend_from_slice(&bytes);
        }
        None => buf.write_u32::<LittleEndian>(NO_META)?,
    }
    Ok(())
}

pub fn read_meta<R: Read>(reader: &mut R) -> io::Result<Option<Value>> {
    let len = reader.read_u32::<LittleEndian>()?;
    if len == NO_META {
        return Ok(None);
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

pub fn write_f32s(buf: &mut Vec<u8>, values: &[f32]) -> io::Result<()> {
    buf.reserve(values.len() * 4);
    for &v in values {
        buf.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_f32s<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<f32>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(reader.read_f32::<LittleEndian>()?);
    }
    Ok(out)
}

pub fn write_u32s(buf: &mut Vec<u8>, values: &[u32]) -> io::Result<()> {
    buf.reserve(values.len() * 4);
    for &v in values {
        buf.write_u32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_u32s<R: Read>(reader: &mut R, n: usize) -> io::Result<Vec<u32>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(reader.read_u32::<LittleEndian>()?);
    }
    Ok(out)
}

pub fn write_str(buf: &mut Vec<u8>, s: &str) -> io::Result<()> {
    buf.write_u32::<LittleEndian>(s.len() as u32)?;
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn read_str<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u32::<LittleEndian>()?;
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
