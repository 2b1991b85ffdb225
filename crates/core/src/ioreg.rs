//! Memory-mapped I/O register file.
//!
//! Each address in `0..=io_end` is a byte of storage. A peripheral can claim
//! an address with a use mask and a read-only mask; CPU accesses to a claimed
//! address are then routed to its handlers by the device:
//!
//! - read: the owner's read handler runs first (it may refresh the value),
//!   then the stored value is returned masked by the use mask,
//! - write: the stored value becomes `(old & ro) | (value & use & !ro)`, then
//!   the owner's write handler receives [`IoRegWrite`] and has the last word.
//!
//! Unclaimed addresses are plain storage. Addresses past `io_end` read 0 and
//! ignore writes.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::peripheral::PeripheralId;
use crate::types::RegAddr;

/// Data passed to a write handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoRegWrite {
    /// Value written by the CPU, unmasked.
    pub value: u8,
    /// Stored value before the write.
    pub old: u8,
}

impl IoRegWrite {
    /// Bits that changed from 0 to 1.
    pub fn posedge(&self) -> u8 {
        self.value & !self.old
    }

    /// Bits that changed from 1 to 0.
    pub fn negedge(&self) -> u8 {
        !self.value & self.old
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoRegister {
    pub value: u8,
    pub owner: Option<PeripheralId>,
    pub use_mask: u8,
    pub ro_mask: u8,
}

pub struct RegisterFile {
    regs: Vec<IoRegister>,
}

impl RegisterFile {
    pub fn new(io_end: RegAddr) -> Self {
        RegisterFile { regs: vec![IoRegister::default(); io_end as usize + 1] }
    }

    pub fn io_end(&self) -> RegAddr {
        (self.regs.len() - 1) as RegAddr
    }

    pub fn get(&self, addr: RegAddr) -> Option<&IoRegister> {
        self.regs.get(addr as usize)
    }

    /// Claim `addr` for `owner`. Claiming twice by the same owner updates the masks.
    pub fn claim(&mut self, addr: RegAddr, owner: PeripheralId, use_mask: u8, ro_mask: u8) -> SimResult<()> {
        let reg = self
            .regs
            .get_mut(addr as usize)
            .ok_or(SimError::RegisterOutOfRange(addr))?;
        match reg.owner {
            Some(o) if o != owner => Err(SimError::RegisterCollision { addr, owner: o }),
            _ => {
                reg.owner = Some(owner);
                reg.use_mask = use_mask;
                reg.ro_mask = ro_mask;
                Ok(())
            }
        }
    }

    /// Release every address claimed by `owner`.
    pub fn release(&mut self, owner: PeripheralId) {
        for reg in self.regs.iter_mut().filter(|r| r.owner == Some(owner)) {
            reg.owner = None;
            reg.use_mask = 0;
            reg.ro_mask = 0;
        }
    }

    pub fn owner(&self, addr: RegAddr) -> Option<PeripheralId> {
        self.regs.get(addr as usize).and_then(|r| r.owner)
    }

    /// CPU-side write. Returns the owner and handler data if the address is claimed.
    pub fn cpu_write(&mut self, addr: RegAddr, value: u8) -> Option<(PeripheralId, IoRegWrite)> {
        let reg = self.regs.get_mut(addr as usize)?;
        let old = reg.value;
        match reg.owner {
            Some(owner) => {
                reg.value = (old & reg.ro_mask) | (value & reg.use_mask & !reg.ro_mask);
                Some((owner, IoRegWrite { value, old }))
            }
            None => {
                reg.value = value;
                None
            }
        }
    }

    /// CPU-side read, after the owner's read handler has run.
    pub fn cpu_read(&self, addr: RegAddr) -> u8 {
        match self.regs.get(addr as usize) {
            Some(reg) if reg.owner.is_some() => reg.value & reg.use_mask,
            Some(reg) => reg.value,
            None => 0,
        }
    }

    /// Peripheral-side raw read.
    #[inline(always)]
    pub fn value(&self, addr: RegAddr) -> u8 {
        self.regs.get(addr as usize).map_or(0, |r| r.value)
    }

    /// Peripheral-side raw write, no handler involved.
    #[inline(always)]
    pub fn set_value(&mut self, addr: RegAddr, v: u8) {
        if let Some(r) = self.regs.get_mut(addr as usize) {
            r.value = v;
        }
    }

    /// Zero every value, keeping the claims.
    pub fn reset(&mut self) {
        for r in self.regs.iter_mut() {
            r.value = 0;
        }
    }

    pub fn values(&self) -> Vec<u8> {
        self.regs.iter().map(|r| r.value).collect()
    }

    pub fn load_values(&mut self, values: &[u8]) {
        for (r, &v) in self.regs.iter_mut().zip(values) {
            r.value = v;
        }
    }
}
