//! Word-aligned byte storage for sample data
//!
//! Devices and producers see plain `&mut [u8]`, but callers almost always
//! reinterpret that as `f32`/`i16`/`i32` samples. Backing the bytes with
//! `u64` words keeps every buffer 8-byte aligned so `bytemuck` casts succeed.

/// Heap byte buffer with 8-byte alignment
pub struct AlignedBuf {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuf {
    /// Allocate `len` bytes filled with `fill`
    pub fn new(len: usize, fill: u8) -> Self {
        let mut buf = Self {
            words: Vec::new(),
            len: 0,
        };
        buf.resize(len, fill);
        buf
    }

    /// Resize to `len` bytes; new and retained bytes are set to `fill`
    ///
    /// Only grows the allocation, never shrinks it, so steady-state resizing
    /// does not allocate.
    pub fn resize(&mut self, len: usize, fill: u8) {
        let words = len.div_ceil(8);
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
        self.len = len;
        self.as_mut_slice().fill(fill);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuf").field("len", &self.len).finish()
    }
}
