use thiserror::Error;

/// The allocator refused to grow one of the scan buffers. Always fatal to
/// the run; on volumes with 10⁸ inodes the buffers are the dominant memory
/// cost and there is nothing useful left to do without them.
#[derive(Debug, Error)]
#[error("out of memory: could not grow a scan buffer to {attempted} bytes")]
pub struct OutOfMemory {
    attempted: usize,
}

impl OutOfMemory {
    pub(crate) fn new(attempted: usize) -> OutOfMemory {
        OutOfMemory { attempted }
    }
}

const INITIAL_CAPACITY: usize = 64 * 1024;
const GROWTH_STEP_MAX: usize = 1024 * 1024;

/// Append-only byte buffer with an element count, shared by the inode table
/// and the dirent store.
///
/// Capacity starts at 64 KiB and grows by `min(capacity, 1 MiB)`: geometric
/// while small so tiny filesystems never pay for many reallocations, linear
/// once past 1 MiB so a table of 10⁸ records does not over-allocate by
/// gigabytes the way plain doubling would.
///
/// Offsets returned by [`push`](PackedBuf::push) are `u32`, which caps one
/// buffer at 4 GiB; overflowing that is reported as [`OutOfMemory`].
#[derive(Debug, Default)]
pub struct PackedBuf {
    buf: Vec<u8>,
    count: usize,
    capacity: usize,
}

impl PackedBuf {
    pub fn new() -> PackedBuf {
        PackedBuf::default()
    }

    /// Append one element of `bytes.len()` bytes, returning its byte offset.
    pub fn push(&mut self, bytes: &[u8]) -> Result<u32, OutOfMemory> {
        let offset = self.buf.len();
        let needed = offset + bytes.len();
        if needed > u32::MAX as usize {
            return Err(OutOfMemory::new(needed));
        }
        self.ensure(needed)?;
        self.buf.extend_from_slice(bytes);
        self.count += 1;
        Ok(offset as u32)
    }

    fn ensure(&mut self, needed: usize) -> Result<(), OutOfMemory> {
        while self.capacity < needed {
            self.capacity = if self.capacity == 0 {
                INITIAL_CAPACITY
            } else {
                self.capacity + self.capacity.min(GROWTH_STEP_MAX)
            };
        }
        if self.capacity > self.buf.capacity() {
            let extra = self.capacity - self.buf.len();
            self.buf
                .try_reserve_exact(extra)
                .map_err(|_| OutOfMemory::new(self.capacity))?;
        }
        Ok(())
    }

    /// Number of elements appended so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of bytes used so far.
    pub fn used(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        crate::read_le32(&self.buf[offset..])
    }

    pub fn put_u32_at(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}
