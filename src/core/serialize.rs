// Length-prefixed binary serialization for ledger records

use crate::error::{LedgerError, Result};
use std::io::{self, Cursor, Read, Write};

/// Types stored in the block store or the UTXO index.
///
/// Decoding then re-encoding a value must reproduce the original bytes,
/// since block and transaction digests are taken over this encoding.
pub trait Serializable: Sized {
    fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()>;

    fn read_from<R: Read>(reader: &mut R) -> Result<Self>;

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Decode a value that must span the whole input
    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let value = Self::read_from(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(LedgerError::Serialization(format!(
                "{} trailing bytes after record",
                data.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }
}

fn truncated(err: io::Error) -> LedgerError {
    LedgerError::Serialization(err.to_string())
}

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => writer.write_all(&[value as u8]),
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())
        }
        0x10000..=0xffff_ffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())
        }
    }
}

/// Read a variable-length integer, rejecting non-minimal encodings so
/// re-serialization stays byte-identical
pub fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let [prefix] = read_array(reader)?;

    let (value, min) = match prefix {
        0..=0xfc => return Ok(prefix as u64),
        0xfd => (u16::from_le_bytes(read_array(reader)?) as u64, 0xfd),
        0xfe => (u32::from_le_bytes(read_array(reader)?) as u64, 0x10000),
        0xff => (u64::from_le_bytes(read_array(reader)?), 0x1_0000_0000),
    };

    if value < min {
        return Err(LedgerError::Serialization(format!(
            "Non-canonical varint encoding of {}",
            value
        )));
    }
    Ok(value)
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_varint(reader)?;
    let mut data = Vec::new();
    let read = reader
        .by_ref()
        .take(len)
        .read_to_end(&mut data)
        .map_err(truncated)?;
    if read as u64 != len {
        return Err(LedgerError::Serialization(format!(
            "Truncated byte string: expected {}, got {}",
            len, read
        )));
    }
    Ok(data)
}

/// Read a fixed number of bytes
pub fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

/// Read a VarInt element count followed by that many records
pub fn read_vec<R: Read, T: Serializable>(reader: &mut R) -> Result<Vec<T>> {
    let count = read_varint(reader)?;
    // Cap the up-front allocation; a corrupt count fails on the reads below
    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        items.push(T::read_from(reader)?);
    }
    Ok(items)
}

/// Write a VarInt element count followed by the records
pub fn write_vec<W: Write, T: Serializable>(writer: &mut W, items: &[T]) -> io::Result<()> {
    write_varint(writer, items.len() as u64)?;
    for item in items {
        item.write_to(writer)?;
    }
    Ok(())
}
