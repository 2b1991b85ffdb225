//! Primitive types shared by the whole simulation core.
//!
//! - [`RegAddr`] / [`IntVect`]: register addresses and interrupt vector indexes
//! - [`BitField`] / [`RegBit`]: bit-field helpers for register manipulation
//! - [`CtlId`]: four-character peripheral identifiers (`"IOGA"`, `"VREF"`, ...)
//! - [`VarData`]: variant payload carried by signals and control requests

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pin::PinId;
use crate::signal::SignalId;

/// Absolute I/O register address in the data space.
pub type RegAddr = u16;

/// Interrupt vector index. Vector 0 is the reset vector.
pub type IntVect = u16;

// ─── Bit fields ─────────────────────────────────────────────────────────────

/// A contiguous group of bits inside a register byte.
///
/// The mask is kept in place (already shifted), so `mask == 0b0011_0000`
/// for a 2-bit field starting at bit 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitField {
    pub bit: u8,
    pub mask: u8,
}

impl BitField {
    pub const fn new(bit: u8, width: u8) -> Self {
        let ones = ((1u16 << width) - 1) as u8;
        BitField { bit, mask: ones << bit }
    }

    /// Single-bit field.
    pub const fn bit(bit: u8) -> Self {
        BitField::new(bit, 1)
    }

    /// Field value, right-aligned.
    #[inline(always)]
    pub const fn extract(self, v: u8) -> u8 {
        (v & self.mask) >> self.bit
    }

    /// True if any bit of the field is set in `v`.
    #[inline(always)]
    pub const fn test(self, v: u8) -> bool {
        v & self.mask != 0
    }

    /// OR the right-aligned `f` into the field of `v`.
    #[inline(always)]
    pub const fn set_to(self, v: u8, f: u8) -> u8 {
        v | ((f << self.bit) & self.mask)
    }

    /// Clear the bits of the field of `v` that are set in the right-aligned `f`.
    #[inline(always)]
    pub const fn clear_from(self, v: u8, f: u8) -> u8 {
        v & !((f << self.bit) & self.mask)
    }

    /// Replace the whole field of `v` by the right-aligned `f`.
    #[inline(always)]
    pub const fn replace(self, v: u8, f: u8) -> u8 {
        (v & !self.mask) | ((f << self.bit) & self.mask)
    }

    /// All ones, right-aligned.
    #[inline(always)]
    pub const fn ones(self) -> u8 {
        self.mask >> self.bit
    }
}

/// A bit field bound to a register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegBit {
    pub addr: RegAddr,
    pub field: BitField,
}

impl RegBit {
    pub const fn new(addr: RegAddr, bit: u8, width: u8) -> Self {
        RegBit { addr, field: BitField::new(bit, width) }
    }
}

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Four-character identifier of a peripheral, packed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CtlId(pub u32);

impl CtlId {
    pub const CORE: CtlId = CtlId::from_chars(*b"CORE");
    pub const INTC: CtlId = CtlId::from_chars(*b"INTR");
    pub const VREF: CtlId = CtlId::from_chars(*b"VREF");
    pub const CONSOLE: CtlId = CtlId::from_chars(*b"CSLE");

    pub const fn from_chars(c: [u8; 4]) -> Self {
        CtlId((c[0] as u32) | (c[1] as u32) << 8 | (c[2] as u32) << 16 | (c[3] as u32) << 24)
    }

    /// GPIO port with the given letter (`'A'`..`'F'`).
    pub const fn port(letter: char) -> Self {
        CtlId::from_chars([b'I', b'O', b'G', letter as u8])
    }

    /// Analog comparator number `n`.
    pub const fn acp(n: u8) -> Self {
        CtlId::from_chars([b'A', b'C', b'P', b'0' + n])
    }

    pub fn chars(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for CtlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.chars() {
            if c == 0 {
                break;
            }
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

/// Hash a name into a 32-bit identifier (FNV-1a). Used for pin ids.
pub fn str_to_id(s: &str) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in s.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

// ─── Variant payload ────────────────────────────────────────────────────────

/// Payload of a signal or a control request.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum VarData {
    #[default]
    Invalid,
    Uint(u32),
    Int(i32),
    Double(f64),
    Signal(SignalId),
    Pin(PinId),
}

impl VarData {
    pub fn is_valid(&self) -> bool {
        !matches!(self, VarData::Invalid)
    }

    pub fn as_uint(&self) -> u32 {
        match *self {
            VarData::Uint(u) => u,
            VarData::Int(i) => i as u32,
            VarData::Double(d) => d as u32,
            _ => 0,
        }
    }

    pub fn as_int(&self) -> i32 {
        match *self {
            VarData::Uint(u) => u as i32,
            VarData::Int(i) => i,
            VarData::Double(d) => d as i32,
            _ => 0,
        }
    }

    pub fn as_double(&self) -> f64 {
        match *self {
            VarData::Uint(u) => u as f64,
            VarData::Int(i) => i as f64,
            VarData::Double(d) => d,
            _ => 0.0,
        }
    }

    pub fn as_signal(&self) -> Option<SignalId> {
        match *self {
            VarData::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pin(&self) -> Option<PinId> {
        match *self {
            VarData::Pin(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitfield_ops() {
        let isc = BitField::new(0, 3);
        assert_eq!(isc.mask, 0x07);
        assert_eq!(isc.extract(0x0D), 5);
        assert_eq!(isc.replace(0x0F, 2), 0x0A);

        let intmode = BitField::new(4, 2);
        assert_eq!(intmode.mask, 0x30);
        assert_eq!(intmode.extract(0xB0), 3);
        assert_eq!(intmode.set_to(0x00, 1), 0x10);
        assert_eq!(intmode.clear_from(0x30, 1), 0x20);
        assert_eq!(intmode.ones(), 3);
        assert!(BitField::bit(7).test(0x80));
        assert!(!BitField::bit(7).test(0x7F));
    }

    #[test]
    fn test_ctl_id_display() {
        assert_eq!(CtlId::port('C').to_string(), "IOGC");
        assert_eq!(CtlId::acp(0).to_string(), "ACP0");
        assert_eq!(CtlId::VREF.to_string(), "VREF");
        assert_ne!(CtlId::port('A'), CtlId::port('B'));
    }

    #[test]
    fn test_str_to_id_stable() {
        assert_eq!(str_to_id("PA0"), str_to_id("PA0"));
        assert_ne!(str_to_id("PA0"), str_to_id("PA1"));
    }

    #[test]
    fn test_vardata_conversions() {
        assert_eq!(VarData::Double(2.7).as_uint(), 2);
        assert_eq!(VarData::Uint(3).as_double(), 3.0);
        assert_eq!(VarData::Int(-1).as_int(), -1);
        assert!(!VarData::Invalid.is_valid());
        assert_eq!(VarData::Uint(1).as_signal(), None);
    }
}
