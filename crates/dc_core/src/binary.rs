//! Little-endian field helpers shared by the results-file records.
//!
//! Each read names the field it was reading so a truncated file reports where it
//! stopped.

use std::io::{self, Read, Write};

use crate::results::{FormatError, FormatResult};

fn read_word<R: Read>(r: &mut R, field: &'static str) -> FormatResult<[u8; 4]> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FormatError::Truncated { field },
        _ => FormatError::Io(e),
    })?;
    Ok(buf)
}

pub(crate) fn read_i32<R: Read>(r: &mut R, field: &'static str) -> FormatResult<i32> {
    Ok(i32::from_le_bytes(read_word(r, field)?))
}

pub(crate) fn read_u32<R: Read>(r: &mut R, field: &'static str) -> FormatResult<u32> {
    Ok(u32::from_le_bytes(read_word(r, field)?))
}

pub(crate) fn read_f32<R: Read>(r: &mut R, field: &'static str) -> FormatResult<f32> {
    Ok(f32::from_le_bytes(read_word(r, field)?))
}

pub(crate) fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Discards `len` bytes, reporting truncation against `field`.
pub(crate) fn skip<R: Read>(r: &mut R, len: u64, field: &'static str) -> FormatResult<()> {
    let copied = io::copy(&mut r.by_ref().take(len), &mut io::sink())?;
    if copied != len {
        return Err(FormatError::Truncated { field });
    }
    Ok(())
}
