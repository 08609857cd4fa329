//! Bounds-checked reads over firmware-provided byte buffers.
//!
//! Every field of the MP structures is read through [`RawReader`], so a
//! table whose declared length overstates its backing memory fails with
//! an error instead of reading past the slice.

use core::mem;
use core::ptr;

/// Errors raised when reading raw byte buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAccessError {
    /// Requested range extends past the backing slice.
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },
    /// Offset math overflowed.
    Overflow,
}

/// Checked, unaligned little-endian access to a byte slice.
#[derive(Clone, Copy)]
pub struct RawReader<'a> {
    data: &'a [u8],
}

impl<'a> RawReader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Copy a plain layout struct out of the buffer.
    ///
    /// `T` must be a `repr(C, packed)` type made only of integers, so any
    /// bit pattern is a valid value.
    pub fn read<T>(&self, offset: usize) -> Result<T, RawAccessError>
    where
        T: Copy,
    {
        self.ensure(offset, mem::size_of::<T>())?;
        // SAFETY: the range was checked above and read_unaligned has no
        // alignment requirement.
        unsafe {
            let ptr = self.data.as_ptr().add(offset) as *const T;
            Ok(ptr::read_unaligned(ptr))
        }
    }

    pub fn u8(&self, offset: usize) -> Result<u8, RawAccessError> {
        self.ensure(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn u16(&self, offset: usize) -> Result<u16, RawAccessError> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&self, offset: usize) -> Result<u32, RawAccessError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], RawAccessError> {
        if len == 0 {
            return Ok(&[]);
        }
        self.ensure(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    fn ensure(&self, offset: usize, size: usize) -> Result<(), RawAccessError> {
        let end = offset.checked_add(size).ok_or(RawAccessError::Overflow)?;
        if end > self.data.len() {
            Err(RawAccessError::OutOfBounds {
                offset,
                size,
                len: self.data.len(),
            })
        } else {
            Ok(())
        }
    }
}

/// Byte-wise sum modulo 256. A valid MP structure sums to zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
