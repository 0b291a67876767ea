use thiserror::Error;

use crate::crypto::{Hash, HASH_SIZE};

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("not enough bytes left in reader")]
    InvalidSize,
    #[error("invalid value encountered while decoding")]
    InvalidValue,
    #[error("invalid hex input")]
    InvalidHex,
    #[error("invalid utf8 string")]
    InvalidString,
}

// Cursor over a borrowed byte slice; every decode goes through it so a
// truncated or trailing-garbage buffer is always rejected
pub struct Reader<'a> {
    bytes: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, total: 0 }
    }

    pub fn total_size(&self) -> usize {
        self.total + self.bytes.len()
    }

    pub fn total_read(&self) -> usize {
        self.total
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        if self.bytes.len() < count {
            return Err(ReaderError::InvalidSize);
        }
        let (taken, rest) = self.bytes.split_at(count);
        self.bytes = rest;
        self.total += count;
        Ok(taken)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().map_err(|_| ReaderError::InvalidSize)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().map_err(|_| ReaderError::InvalidSize)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().map_err(|_| ReaderError::InvalidSize)?))
    }

    pub fn read_u128(&mut self) -> Result<u128, ReaderError> {
        let bytes = self.take(16)?;
        Ok(u128::from_be_bytes(bytes.try_into().map_err(|_| ReaderError::InvalidSize)?))
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ReaderError> {
        Ok(self.take(count)?.to_vec())
    }

    pub fn read_bytes_ref(&mut self, count: usize) -> Result<&'a [u8], ReaderError> {
        self.take(count)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        let bytes = self.take(32)?;
        bytes.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_bytes_64(&mut self) -> Result<[u8; 64], ReaderError> {
        let bytes = self.take(64)?;
        bytes.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        let bytes = self.take(HASH_SIZE)?;
        Ok(Hash::new(bytes.try_into().map_err(|_| ReaderError::InvalidSize)?))
    }

    // u16 length prefix, utf8 payload
    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let len = self.read_u16()? as usize;
        self.read_string_with_size(len)
    }

    pub fn read_string_with_size(&mut self, size: usize) -> Result<String, ReaderError> {
        let bytes = self.take(size)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ReaderError::InvalidString)
    }
}
