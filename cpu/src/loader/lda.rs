//! The PDP-11 absolute loader format.
//!
//! A file is a sequence of records, optionally separated by zero
//! bytes of leader.  Each record is
//!
//! ```text
//! 001 000 count_lo count_hi addr_lo addr_hi data... checksum
//! ```
//!
//! where `count` covers the six header bytes plus the data, and the
//! checksum makes the byte sum of the whole record zero (mod 256).  A
//! record without data ends the file; its address is the start
//! address, where an odd address means "don't start".
use std::fs;
use std::path::Path;

use super::image::CodeImage;
use super::LoadError;

const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsoluteImage {
    pub image: CodeImage,
    pub start: Option<u16>,
}

fn bad(offset: usize, reason: impl Into<String>) -> LoadError {
    LoadError::BadAbsoluteFile {
        offset,
        reason: reason.into(),
    }
}

pub fn parse_absolute(bytes: &[u8]) -> Result<AbsoluteImage, LoadError> {
    let mut image = CodeImage::new();
    let mut pos = 0;
    loop {
        while bytes.get(pos) == Some(&0) {
            pos += 1;
        }
        let record_start = pos;
        let header = bytes
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| bad(record_start, "file ends without a start address record"))?;
        if header[0] != 1 || header[1] != 0 {
            return Err(bad(
                record_start,
                format!(
                    "expected record signature 001 000, found {:03o} {:03o}",
                    header[0], header[1]
                ),
            ));
        }
        let count = usize::from(u16::from_le_bytes([header[2], header[3]]));
        let address = u16::from_le_bytes([header[4], header[5]]);
        if count < HEADER_LEN {
            return Err(bad(record_start, format!("record length {count} is too short")));
        }
        // The record proper plus its checksum byte.
        let record = bytes
            .get(pos..pos + count + 1)
            .ok_or_else(|| bad(record_start, "record is truncated"))?;
        let sum = record.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        if sum != 0 {
            return Err(bad(record_start, format!("checksum error (sum {sum:03o})")));
        }
        pos += count + 1;

        let data = &record[HEADER_LEN..count];
        if data.is_empty() {
            let start = if address & 1 == 0 { Some(address) } else { None };
            return Ok(AbsoluteImage { image, start });
        }
        for (offset, byte) in data.iter().enumerate() {
            // Addresses wrap within the 16-bit space.
            image.put_byte(address.wrapping_add(offset as u16), *byte);
        }
    }
}

pub fn read_absolute(path: &Path) -> Result<AbsoluteImage, LoadError> {
    let bytes = fs::read(path)?;
    parse_absolute(&bytes)
}

#[cfg(test)]
pub(crate) fn record(address: u16, data: &[u8]) -> Vec<u8> {
    let count = (data.len() + HEADER_LEN) as u16;
    let mut bytes = vec![1, 0];
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.extend_from_slice(&address.to_le_bytes());
    bytes.extend_from_slice(data);
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    bytes.push(sum.wrapping_neg());
    bytes
}
