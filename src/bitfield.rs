use crate::packed::OutOfMemory;

/// Packed boolean vector indexed by inode number. One bit per inode over the
/// whole configured inode count, so a 10⁸-inode volume costs ~12 MB per field.
///
/// Callers guarantee `i < nbits`; the accessors are on the scan's hot path
/// and do not range-check beyond the slice index itself.
#[derive(Debug)]
pub struct Bitfield {
    bits: Vec<u8>,
    nbits: u64,
}

impl Bitfield {
    pub fn new(nbits: u64) -> Result<Bitfield, OutOfMemory> {
        let bytes = ((nbits + 7) / 8) as usize;
        let mut bits = Vec::new();
        bits.try_reserve_exact(bytes)
            .map_err(|_| OutOfMemory::new(bytes))?;
        bits.resize(bytes, 0);
        Ok(Bitfield { bits, nbits })
    }

    pub fn fill(&mut self, value: bool) {
        self.bits.fill(if value { 0xff } else { 0 });
    }

    pub fn set(&mut self, i: u32) {
        debug_assert!((i as u64) < self.nbits);
        self.bits[(i >> 3) as usize] |= 1 << (i & 7);
    }

    pub fn clear(&mut self, i: u32) {
        debug_assert!((i as u64) < self.nbits);
        self.bits[(i >> 3) as usize] &= !(1 << (i & 7));
    }

    pub fn get(&self, i: u32) -> bool {
        debug_assert!((i as u64) < self.nbits);
        0 != self.bits[(i >> 3) as usize] & (1 << (i & 7))
    }
}
