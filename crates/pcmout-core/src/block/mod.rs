//! Block-rotation output
//!
//! A [`BlockPlayer`] keeps a small ring of fixed-size blocks. Each block is
//! lent to the device on submission and handed back on completion:
//!
//! ```text
//!              fill + submit                      completion
//!  ┌────────┐ ───────────────► ┌──────────────┐ ─────────────► ┌────────┐
//!  │  Idle  │                  │  Submitted   │                │  Idle  │
//!  │ (ring) │                  │ (device owns │                │ (ring) │
//!  └────────┘                  │  the Block)  │                └────────┘
//!                              └──────────────┘
//! ```
//!
//! The block *value* moves into the device, so the engine cannot touch or free
//! memory the device is still reading.

mod player;

pub use player::BlockPlayer;

use crate::buffer::AlignedBuf;
use crate::producer::{clamp_produced, DataProducer};

/// Fixed-capacity sample buffer rotated between engine and device
pub struct Block {
    index: usize,
    data: AlignedBuf,
    len: usize,
}

impl Block {
    pub(crate) fn new(index: usize, capacity: usize, silence: u8) -> Self {
        Self {
            index,
            data: AlignedBuf::new(capacity, silence),
            len: 0,
        }
    }

    /// Position of this block in its ring
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Valid bytes for the current submission
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The valid bytes the device should play
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data.as_slice()[..self.len]
    }

    /// Let the producer fill the whole capacity; returns the clamped length
    pub(crate) fn fill(&mut self, producer: &mut dyn DataProducer) -> usize {
        let capacity = self.capacity();
        let produced = producer.produce(self.data.as_mut_slice());
        let len = clamp_produced(produced, capacity);
        if len as isize != produced {
            log::debug!(
                "Block {}: producer returned {} bytes, clamped to {}",
                self.index,
                produced,
                len
            );
        }
        self.len = len;
        len
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.index)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Ownership state of one ring slot
enum Slot {
    /// Owned by the engine, eligible for refill
    Idle(Block),
    /// Lent to the device until its completion arrives
    Submitted,
}

/// Fixed ring of N blocks with a refill cursor
pub(crate) struct BlockRing {
    slots: Vec<Slot>,
    cursor: usize,
}

impl BlockRing {
    pub(crate) fn new(count: usize, block_size: usize, silence: u8) -> Self {
        Self {
            slots: (0..count)
                .map(|i| Slot::Idle(Block::new(i, block_size, silence)))
                .collect(),
            cursor: 0,
        }
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Take the block at the cursor, marking its slot submitted
    ///
    /// Returns `None` when that block is still lent to the device.
    pub(crate) fn checkout(&mut self) -> Option<Block> {
        let slot = &mut self.slots[self.cursor];
        match std::mem::replace(slot, Slot::Submitted) {
            Slot::Idle(block) => Some(block),
            Slot::Submitted => None,
        }
    }

    /// Move the cursor to the next block
    pub(crate) fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Return a block to its slot (after completion or a rejected submit)
    pub(crate) fn give_back(&mut self, block: Block) {
        let index = block.index;
        match self.slots.get_mut(index) {
            Some(slot) => {
                if matches!(slot, Slot::Idle(_)) {
                    log::warn!("Block {} returned twice", index);
                }
                *slot = Slot::Idle(block);
            }
            None => log::error!("Block index {} outside ring of {}", index, self.slots.len()),
        }
    }

    /// Number of slots currently lent to the device
    #[cfg(test)]
    pub(crate) fn submitted(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Submitted))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_fill_clamps() {
        let mut block = Block::new(0, 16, 0);

        let mut oversized = |buf: &mut [u8]| (buf.len() * 2) as isize;
        assert_eq!(block.fill(&mut oversized), 16);
        assert_eq!(block.bytes().len(), 16);

        let mut negative = |_: &mut [u8]| -5isize;
        assert_eq!(block.fill(&mut negative), 0);
        assert!(block.is_empty());
    }

    #[test]
    fn test_ring_checkout_cycle() {
        let mut ring = BlockRing::new(3, 8, 0);

        let first = ring.checkout().unwrap();
        ring.advance();
        let second = ring.checkout().unwrap();
        ring.advance();
        assert_eq!((first.index(), second.index()), (0, 1));
        assert_eq!(ring.submitted(), 2);
        assert_eq!(ring.cursor(), 2);

        let third = ring.checkout().unwrap();
        ring.advance();
        assert_eq!(ring.cursor(), 0);

        // Block 0 is still lent out
        assert!(ring.checkout().is_none());

        ring.give_back(first);
        ring.give_back(second);
        ring.give_back(third);
        assert_eq!(ring.submitted(), 0);
        assert_eq!(ring.checkout().unwrap().index(), 0);
    }
}
