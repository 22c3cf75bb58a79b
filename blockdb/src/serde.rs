//! Binary encoding helpers shared by the block index, chunks, and
//! tombstones files.
//!
//! All integers are little-endian. Strings are a `u32` length prefix
//! followed by UTF-8 bytes. Every file starts with a `u32` magic and a
//! version byte so format drift is caught before any payload is decoded.

use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

pub const FORMAT_VERSION: u8 = 0x01;

pub fn put_str(buf: &mut impl BufMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

pub fn get_str(buf: &mut &[u8]) -> Result<String> {
    let len = get_u32(buf)? as usize;
    if buf.len() < len {
        return Err(Error::Encoding(format!(
            "buffer too short for string: need {} bytes, have {}",
            len,
            buf.len()
        )));
    }
    let bytes = &buf[..len];
    let s = std::str::from_utf8(bytes)
        .map_err(|e| Error::Encoding(format!("invalid UTF-8: {}", e)))?
        .to_string();
    buf.advance(len);
    Ok(s)
}

pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn get_i64(buf: &mut &[u8]) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}

pub fn put_header(buf: &mut impl BufMut, magic: u32) {
    buf.put_u32_le(magic);
    buf.put_u8(FORMAT_VERSION);
}

pub fn check_header(buf: &mut &[u8], magic: u32, what: &str) -> Result<()> {
    let got = get_u32(buf)?;
    if got != magic {
        return Err(Error::Encoding(format!(
            "bad {} magic: 0x{:08x}, want 0x{:08x}",
            what, got, magic
        )));
    }
    let version = get_u8(buf)?;
    if version != FORMAT_VERSION {
        return Err(Error::Encoding(format!(
            "unsupported {} format version {}",
            what, version
        )));
    }
    Ok(())
}

fn ensure(buf: &[u8], need: usize) -> Result<()> {
    if buf.len() < need {
        return Err(Error::Encoding(format!(
            "buffer too short: need {} bytes, have {}",
            need,
            buf.len()
        )));
    }
    Ok(())
}
