//! Firmware container handed over by an external loader.
//!
//! The loader (ELF, Intel HEX, ...) is not part of this crate: it produces
//! [`MemBlock`]s tagged with a [`MemoryArea`] plus a few run parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory::NonVolatileMemory;
use crate::types::RegAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryArea {
    Flash,
    Eeprom,
    Fuses,
    Lock,
    Signature,
    UserSignatures,
}

impl MemoryArea {
    pub fn from_name(name: &str) -> Option<MemoryArea> {
        match name {
            "flash" => Some(MemoryArea::Flash),
            "eeprom" => Some(MemoryArea::Eeprom),
            "fuse" | "fuses" => Some(MemoryArea::Fuses),
            "lock" => Some(MemoryArea::Lock),
            "signature" => Some(MemoryArea::Signature),
            "user_signatures" | "usersig" => Some(MemoryArea::UserSignatures),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryArea::Flash => "flash",
            MemoryArea::Eeprom => "eeprom",
            MemoryArea::Fuses => "fuses",
            MemoryArea::Lock => "lock",
            MemoryArea::Signature => "signature",
            MemoryArea::UserSignatures => "user_signatures",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemBlock {
    pub base: usize,
    pub buf: Vec<u8>,
}

impl MemBlock {
    pub fn new(base: usize, buf: Vec<u8>) -> Self {
        MemBlock { base, buf }
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Firmware {
    /// Target MCU name, informative.
    pub variant: String,
    /// MCU clock in Hz, required to run.
    pub frequency: u32,
    /// Supply voltage in volts. 0 disables analog features.
    pub vcc: f64,
    /// External analog reference as a ratio of VCC.
    pub aref: f64,
    /// Register used by the firmware to print debug text, if any.
    pub console_register: Option<RegAddr>,
    blocks: BTreeMap<MemoryArea, Vec<MemBlock>>,
}

impl Firmware {
    pub fn new() -> Self {
        Firmware::default()
    }

    pub fn add_block(&mut self, area: MemoryArea, block: MemBlock) {
        self.blocks.entry(area).or_default().push(block);
    }

    pub fn has_memory(&self, area: MemoryArea) -> bool {
        self.blocks.contains_key(&area)
    }

    pub fn memories(&self) -> Vec<MemoryArea> {
        self.blocks.keys().copied().collect()
    }

    /// Total bytes of all the blocks of `area`.
    pub fn memory_size(&self, area: MemoryArea) -> usize {
        self.blocks(area).iter().map(MemBlock::size).sum()
    }

    pub fn blocks(&self, area: MemoryArea) -> &[MemBlock] {
        self.blocks.get(&area).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Program every block of `area`. A failing block does not stop the
    /// others and nothing is rolled back.
    pub fn load_memory(&self, area: MemoryArea, memory: &mut NonVolatileMemory) -> bool {
        let mut status = true;
        for b in self.blocks(area) {
            status &= memory.program(&b.buf, b.base);
        }
        status
    }
}
