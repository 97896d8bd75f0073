// Serialization utilities for Bitcoin data structures

use crate::error::{Result, WalletError};
use std::io::{self, Read};

/// Trait for types with a canonical wire encoding
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self> where Self: Sized;
}

/// Append a variable-length integer (VarInt)
/// Bitcoin uses a compact format for integers
pub fn push_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => {
            buf.push(value as u8);
        }
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Encoded length of a VarInt
pub fn varint_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffffffff => 5,
        _ => 9,
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let [prefix] = read_array::<_, 1>(reader)?;
    Ok(match prefix {
        0xfd => u16::from_le_bytes(read_array(reader)?) as u64,
        0xfe => u32::from_le_bytes(read_array(reader)?) as u64,
        0xff => u64::from_le_bytes(read_array(reader)?),
        small => small as u64,
    })
}

/// Append bytes with length prefix (VarInt length + data)
pub fn push_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    push_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Upper bound for a single length-prefixed item; guards allocations on hostile input
const MAX_VAR_BYTES: u64 = 4_000_000;

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)?;
    if len > MAX_VAR_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("length prefix too large: {}", len)));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub(crate) fn read_array<R: Read + ?Sized, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Map a reader failure on wire bytes to `InvalidEncoding`
pub(crate) fn decode_error(e: io::Error) -> WalletError {
    WalletError::InvalidEncoding(format!("truncated or malformed data: {}", e))
}
