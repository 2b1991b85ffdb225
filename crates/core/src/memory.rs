//! Non-volatile memory model (flash, fuses, EEPROM).
//!
//! Erased cells read 0xFF. Each cell carries a "programmed" tag so that a
//! loader can tell which parts of the memory were written by the firmware.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonVolatileMemory {
    data: Vec<u8>,
    tag: Vec<bool>,
}

impl NonVolatileMemory {
    pub fn new(size: usize) -> Self {
        NonVolatileMemory { data: vec![0xFF; size], tag: vec![false; size] }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Clamp `[base, base + len)` to the memory size.
    fn span(&self, base: usize, len: usize) -> (usize, usize) {
        let base = base.min(self.data.len());
        let len = len.min(self.data.len() - base);
        (base, len)
    }

    pub fn erase(&mut self) {
        self.erase_range(0, self.data.len());
    }

    pub fn erase_range(&mut self, base: usize, len: usize) {
        let (base, len) = self.span(base, len);
        self.data[base..base + len].fill(0xFF);
        self.tag[base..base + len].fill(false);
    }

    /// Program `block` at `base`. The part that fits is written; returns
    /// false if the block did not fit entirely. An empty block always succeeds.
    pub fn program(&mut self, block: &[u8], base: usize) -> bool {
        if block.is_empty() {
            return true;
        }
        let (base, len) = self.span(base, block.len());
        self.data[base..base + len].copy_from_slice(&block[..len]);
        self.tag[base..base + len].fill(true);
        len == block.len()
    }

    pub fn programmed(&self, pos: usize) -> bool {
        self.tag.get(pos).copied().unwrap_or(false)
    }

    #[inline(always)]
    pub fn read(&self, pos: usize) -> u8 {
        self.data.get(pos).copied().unwrap_or(0xFF)
    }

    pub fn block(&self) -> &[u8] {
        &self.data
    }

    pub fn block_range(&self, base: usize, len: usize) -> &[u8] {
        let (base, len) = self.span(base, len);
        &self.data[base..base + len]
    }

    /// Copy up to `buf.len()` bytes starting at `base`; returns the count copied.
    pub fn copy_into(&self, buf: &mut [u8], base: usize) -> usize {
        let src = self.block_range(base, buf.len());
        buf[..src.len()].copy_from_slice(src);
        src.len()
    }

    /// Write without tagging (self-programming by the firmware).
    pub fn write(&mut self, v: u8, pos: usize) {
        if let Some(c) = self.data.get_mut(pos) {
            *c = v;
        }
    }

    pub fn write_block(&mut self, buf: &[u8], base: usize) {
        let (base, len) = self.span(base, buf.len());
        self.data[base..base + len].copy_from_slice(&buf[..len]);
    }
}
