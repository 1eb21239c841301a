//! # Bounded Reader
//!
//! A quota-enforcing view over a byte source.
//!
//! Packets and variable-length headers declare their own length. While parsing
//! one, the reader is given exactly that declared length as its quota so a
//! corrupt or hostile length field can never make the parser read past the
//! declared boundary or off the end of a short buffer.
//!
//! Every read checks the quota first and fails without consuming anything when
//! the request does not fit.

use bytes::{Buf, Bytes};

use crate::error::{constants, ObexError, Result};

/// Reads primitives from `B` while enforcing a byte quota.
#[derive(Debug)]
pub struct BoundedReader<'a, B: Buf> {
    inner: &'a mut B,
    remaining: usize,
}

impl<'a, B: Buf> BoundedReader<'a, B> {
    pub fn new(inner: &'a mut B, quota: usize) -> Self {
        Self {
            inner,
            remaining: quota,
        }
    }

    /// Bytes that may still be read.
    pub fn remaining_quota(&self) -> usize {
        self.remaining
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Check and charge `requested` bytes against the quota.
    fn consume(&mut self, requested: usize) -> Result<()> {
        if requested > self.remaining {
            return Err(ObexError::QuotaExceeded {
                remaining: self.remaining,
                requested,
            });
        }
        if requested > self.inner.remaining() {
            return Err(ObexError::TruncatedPacket);
        }
        self.remaining -= requested;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.consume(1)?;
        Ok(self.inner.get_u8())
    }

    /// Big-endian.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.consume(2)?;
        Ok(self.inner.get_u16())
    }

    /// Big-endian.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.consume(4)?;
        Ok(self.inner.get_u32())
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.consume(len)?;
        Ok(self.inner.copy_to_bytes(len))
    }

    /// Reads `code_units` big-endian UTF-16 code units.
    pub fn read_utf16(&mut self, code_units: usize) -> Result<String> {
        let byte_len = code_units
            .checked_mul(2)
            .ok_or(ObexError::QuotaExceeded {
                remaining: self.remaining,
                requested: usize::MAX,
            })?;
        self.consume(byte_len)?;
        let units: Vec<u16> = (0..code_units).map(|_| self.inner.get_u16()).collect();
        String::from_utf16(&units)
            .map_err(|_| ObexError::InvalidText(constants::ERR_INVALID_UTF16.to_string()))
    }

    /// Re-buffering from the underlying source is not meaningful for a
    /// bounded region.
    pub fn load(&mut self, _len: usize) -> Result<()> {
        Err(ObexError::DisallowedOnBoundedReader(
            constants::ERR_BOUNDED_LOAD.to_string(),
        ))
    }

    /// The underlying source cannot be handed out while a quota is active.
    pub fn detach(self) -> Result<&'a mut B> {
        Err(ObexError::DisallowedOnBoundedReader(
            constants::ERR_BOUNDED_DETACH.to_string(),
        ))
    }
}
