//! Wire buffer traversal for the size, write and read passes.

use super::MarshalError;

/// Align a value up to the nearest multiple of alignment.
#[inline]
pub fn align_to(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

#[derive(Debug)]
enum Region<'b> {
    Sizing,
    Writing(&'b mut [u8]),
}

/// Write-side wire buffer.
///
/// A sizing buffer only counts bytes; a writing buffer fills a bounded
/// region. Both advance the cursor identically for the same sequence of
/// calls, which is what lets the size pass predict the write pass exactly.
///
/// # Example
///
/// ```
/// use ndr_marshal::WireBuffer;
///
/// let mut sizing = WireBuffer::sizing();
/// sizing.write_u8(1)?;
/// sizing.write_u32(7)?;
/// assert_eq!(sizing.position(), 8);
///
/// let mut region = vec![0u8; 8];
/// let mut writing = WireBuffer::writing(&mut region);
/// writing.write_u8(1)?;
/// writing.write_u32(7)?;
/// assert_eq!(region, [1, 0, 0, 0, 7, 0, 0, 0]);
/// # Ok::<(), ndr_marshal::MarshalError>(())
/// ```
#[derive(Debug)]
pub struct WireBuffer<'b> {
    region: Region<'b>,
    position: usize,
}

impl<'b> WireBuffer<'b> {
    /// Create a buffer for the size-compute pass.
    pub fn sizing() -> Self {
        Self {
            region: Region::Sizing,
            position: 0,
        }
    }

    /// Create a buffer that writes into `region`, never past its end.
    pub fn writing(region: &'b mut [u8]) -> Self {
        Self {
            region: Region::Writing(region),
            position: 0,
        }
    }

    /// Returns true when this buffer only counts bytes.
    pub fn is_sizing(&self) -> bool {
        matches!(self.region, Region::Sizing)
    }

    /// Current cursor position relative to the buffer start.
    pub fn position(&self) -> usize {
        self.position
    }

    /// End of the writable region, if bounded.
    pub fn end(&self) -> Option<usize> {
        match &self.region {
            Region::Sizing => None,
            Region::Writing(data) => Some(data.len()),
        }
    }

    fn claim(&mut self, len: usize) -> Result<Option<&mut [u8]>, MarshalError> {
        let start = self.position;
        let end = start + len;
        let slot = match &mut self.region {
            Region::Sizing => None,
            Region::Writing(data) => {
                let available = data.len();
                Some(
                    data.get_mut(start..end)
                        .ok_or(MarshalError::BufferExhausted {
                            needed: end,
                            available,
                        })?,
                )
            }
        };
        self.position = end;
        Ok(slot)
    }

    /// Write raw bytes at the cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), MarshalError> {
        if let Some(slot) = self.claim(bytes.len())? {
            slot.copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Advance by `len` zero bytes.
    pub fn pad(&mut self, len: usize) -> Result<(), MarshalError> {
        if let Some(slot) = self.claim(len)? {
            slot.fill(0);
        }
        Ok(())
    }

    /// Zero-pad the cursor up to `align`.
    pub fn align(&mut self, align: usize) -> Result<(), MarshalError> {
        let aligned = align_to(self.position, align);
        self.pad(aligned - self.position)
    }

    /// Zero-pad the cursor up to an absolute position.
    pub fn pad_to(&mut self, target: usize) -> Result<(), MarshalError> {
        let len = target.saturating_sub(self.position);
        self.pad(len)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), MarshalError> {
        self.write_bytes(&[value])
    }

    /// Write a 4-byte aligned little-endian `u32` (counts, offsets, ids).
    pub fn write_u32(&mut self, value: u32) -> Result<(), MarshalError> {
        self.align(4)?;
        self.write_bytes(&value.to_le_bytes())
    }
}

/// Read-side wire buffer. Reads never cross the end of the wire data.
#[derive(Debug, Clone)]
pub struct WireReader<'w> {
    data: &'w [u8],
    position: usize,
}

impl<'w> WireReader<'w> {
    pub fn new(data: &'w [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'w [u8], MarshalError> {
        let start = self.position;
        let end = start + len;
        let bytes = self
            .data
            .get(start..end)
            .ok_or(MarshalError::BufferExhausted {
                needed: end,
                available: self.data.len(),
            })?;
        self.position = end;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], MarshalError> {
        let available = self.data.len();
        self.read_bytes(N)?
            .try_into()
            .map_err(|_| MarshalError::BufferExhausted {
                needed: self.position,
                available,
            })
    }

    /// Skip forward to `align`, ignoring the padding contents.
    pub fn align(&mut self, align: usize) -> Result<(), MarshalError> {
        let aligned = align_to(self.position, align);
        self.read_bytes(aligned - self.position).map(|_| ())
    }

    /// Skip forward to an absolute position.
    pub fn skip_to(&mut self, target: usize) -> Result<(), MarshalError> {
        let len = target.saturating_sub(self.position);
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, MarshalError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// Read a 4-byte aligned little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, MarshalError> {
        self.align(4)?;
        Ok(u32::from_le_bytes(self.read_array()?))
    }
}
