//! Interrupt controller and interrupt flag helper.
//!
//! The controller keeps one state per vector:
//!
//! ```text
//!   Unused ──register──▶ Idle ──raise──▶ Raised
//!                          ▲               │
//!                          └─cancel / ack──┘
//! ```
//!
//! `raise` on a Raised vector and `cancel` on an Idle one are no-ops.
//! Vector 0 is the reset vector and can never be registered.

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::error::{SimError, SimResult};
use crate::peripheral::{Ctx, PeripheralId};
use crate::signal::SignalId;
use crate::types::{IntVect, RegBit};

// Signal ids raised on the controller signal, index = vector
pub const SIG_INT_RAISED: u16 = 0;
pub const SIG_INT_CANCELLED: u16 = 1;
pub const SIG_INT_ACKNOWLEDGED: u16 = 2;
pub const SIG_INT_RETURNED: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VectorState {
    #[default]
    Unused,
    Idle,
    Raised,
}

#[derive(Debug, Clone, Copy, Default)]
struct VectorSlot {
    state: VectorState,
    owner: Option<PeripheralId>,
}

pub struct InterruptController {
    vectors: Vec<VectorSlot>,
    signal: SignalId,
}

impl InterruptController {
    pub fn new(vector_count: usize, signal: SignalId) -> Self {
        InterruptController { vectors: vec![VectorSlot::default(); vector_count], signal }
    }

    pub fn signal(&self) -> SignalId {
        self.signal
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn register(&mut self, vector: IntVect, owner: PeripheralId) -> SimResult<()> {
        if vector == 0 {
            return Err(SimError::ResetVector);
        }
        let slot = self
            .vectors
            .get_mut(vector as usize)
            .ok_or(SimError::VectorOutOfRange(vector))?;
        if slot.state != VectorState::Unused {
            return Err(SimError::VectorAlreadyRegistered(vector));
        }
        slot.state = VectorState::Idle;
        slot.owner = Some(owner);
        Ok(())
    }

    pub fn unregister_owner(&mut self, owner: PeripheralId) {
        for slot in self.vectors.iter_mut().filter(|s| s.owner == Some(owner)) {
            *slot = VectorSlot::default();
        }
    }

    /// Returns true if the vector went from Idle to Raised.
    pub fn raise(&mut self, vector: IntVect) -> bool {
        match self.vectors.get_mut(vector as usize) {
            Some(slot) if slot.state == VectorState::Idle => {
                slot.state = VectorState::Raised;
                true
            }
            _ => false,
        }
    }

    /// Returns true if the vector went from Raised to Idle.
    pub fn cancel(&mut self, vector: IntVect) -> bool {
        match self.vectors.get_mut(vector as usize) {
            Some(slot) if slot.state == VectorState::Raised => {
                slot.state = VectorState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Acknowledge a raised vector, returning its owner.
    pub fn ack(&mut self, vector: IntVect) -> Option<PeripheralId> {
        if self.cancel(vector) {
            self.vectors[vector as usize].owner
        } else {
            None
        }
    }

    pub fn state(&self, vector: IntVect) -> VectorState {
        self.vectors.get(vector as usize).map_or(VectorState::Unused, |s| s.state)
    }

    pub fn is_raised(&self, vector: IntVect) -> bool {
        self.state(vector) == VectorState::Raised
    }

    pub fn owner(&self, vector: IntVect) -> Option<PeripheralId> {
        self.vectors.get(vector as usize).and_then(|s| s.owner)
    }

    /// Lowest raised vector, which has the highest priority.
    pub fn next_irq(&self) -> Option<IntVect> {
        self.vectors
            .iter()
            .position(|s| s.state == VectorState::Raised)
            .map(|v| v as IntVect)
    }

    /// Cancel every raised vector, keeping registrations.
    pub fn reset(&mut self) {
        for slot in self.vectors.iter_mut() {
            if slot.state == VectorState::Raised {
                slot.state = VectorState::Idle;
            }
        }
    }

    pub fn states(&self) -> Vec<VectorState> {
        self.vectors.iter().map(|s| s.state).collect()
    }

    /// Restore raised/idle states. Registrations are not changed.
    pub fn load_states(&mut self, states: &[VectorState]) {
        for (slot, &st) in self.vectors.iter_mut().zip(states) {
            if slot.state != VectorState::Unused && st != VectorState::Unused {
                slot.state = st;
            }
        }
    }
}

// ─── Interrupt flag ─────────────────────────────────────────────────────────

/// Binds an enable field and a flag field to a vector.
///
/// The request is raised while `enable & flag` is non-zero.
#[derive(Debug, Clone)]
pub struct InterruptFlag {
    clear_on_ack: bool,
    vector: Option<IntVect>,
    raised: bool,
    enable: Option<RegBit>,
    flag: Option<RegBit>,
}

/// Outcome of [`InterruptFlag::update_from_ioreg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagUpdate {
    Unchanged,
    Raised,
    Cancelled,
}

impl InterruptFlag {
    pub fn new(clear_on_ack: bool) -> Self {
        InterruptFlag { clear_on_ack, vector: None, raised: false, enable: None, flag: None }
    }

    /// Register the vector with the controller on behalf of the calling peripheral.
    /// With `vector == None`, the flag works without an interrupt line.
    pub fn init(&mut self, ctx: &mut Ctx<'_>, enable: RegBit, flag: RegBit, vector: Option<IntVect>) -> SimResult<()> {
        self.enable = Some(enable);
        self.flag = Some(flag);
        self.vector = vector;
        if let Some(v) = vector {
            ctx.register_interrupt(v)?;
        }
        Ok(())
    }

    pub fn vector(&self) -> Option<IntVect> {
        self.vector
    }

    pub fn raised(&self) -> bool {
        self.raised
    }

    pub fn flag_raised(&self, bus: &Bus) -> bool {
        match (self.enable, self.flag) {
            (Some(en), Some(fl)) => {
                let en_mask = en.field.extract(bus.read_ioreg(en.addr));
                let fl_mask = fl.field.extract(bus.read_ioreg(fl.addr));
                en_mask & fl_mask != 0
            }
            _ => false,
        }
    }

    /// Sync the request line with the registers.
    pub fn update_from_ioreg(&mut self, ctx: &mut Ctx<'_>) -> FlagUpdate {
        let raised = self.flag_raised(ctx);
        if raised == self.raised {
            return FlagUpdate::Unchanged;
        }
        self.raised = raised;
        if raised {
            self.raise_line(ctx);
            FlagUpdate::Raised
        } else {
            self.cancel_line(ctx);
            FlagUpdate::Cancelled
        }
    }

    /// Set the flag bits in `mask`. Returns true if the request was raised.
    pub fn set_flag(&mut self, ctx: &mut Ctx<'_>, mask: u8) -> bool {
        let Some(fl) = self.flag else { return false };
        let v = fl.field.set_to(ctx.read_ioreg(fl.addr), mask);
        ctx.write_ioreg(fl.addr, v);
        if !self.raised && self.flag_raised(ctx) {
            self.raised = true;
            self.raise_line(ctx);
            true
        } else {
            false
        }
    }

    /// Clear the flag bits in `mask`. Returns true if the request was cancelled.
    pub fn clear_flag(&mut self, ctx: &mut Ctx<'_>, mask: u8) -> bool {
        let Some(fl) = self.flag else { return false };
        let v = fl.field.clear_from(ctx.read_ioreg(fl.addr), mask);
        ctx.write_ioreg(fl.addr, v);
        if self.raised && !self.flag_raised(ctx) {
            self.raised = false;
            self.cancel_line(ctx);
            true
        } else {
            false
        }
    }

    /// To be called from the owner's acknowledge handler.
    pub fn ack(&mut self, ctx: &mut Ctx<'_>) {
        if self.clear_on_ack {
            if let Some(fl) = self.flag {
                self.clear_flag(ctx, fl.field.ones());
            }
        }
    }

    /// Drop the request state after a device reset (registers already zeroed).
    pub fn reset(&mut self) {
        self.raised = false;
    }

    fn raise_line(&self, ctx: &mut Ctx<'_>) {
        if let Some(v) = self.vector {
            ctx.raise_interrupt(v);
        }
    }

    fn cancel_line(&self, ctx: &mut Ctx<'_>) {
        if let Some(v) = self.vector {
            ctx.cancel_interrupt(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rules() {
        let mut intc = InterruptController::new(8, SignalId(0));
        let p = PeripheralId(1);
        assert_eq!(intc.register(0, p), Err(SimError::ResetVector));
        assert_eq!(intc.register(8, p), Err(SimError::VectorOutOfRange(8)));
        assert!(intc.register(3, p).is_ok());
        assert_eq!(intc.register(3, PeripheralId(2)), Err(SimError::VectorAlreadyRegistered(3)));
        assert_eq!(intc.state(3), VectorState::Idle);
        assert_eq!(intc.owner(3), Some(p));
    }

    #[test]
    fn test_raise_cancel_idempotent() {
        let mut intc = InterruptController::new(8, SignalId(0));
        intc.register(5, PeripheralId(0)).unwrap();
        assert!(!intc.cancel(5));
        assert!(intc.raise(5));
        assert!(!intc.raise(5));
        assert_eq!(intc.states(), {
            let mut v = vec![VectorState::Unused; 8];
            v[5] = VectorState::Raised;
            v
        });
        assert!(intc.cancel(5));
        assert!(!intc.cancel(5));
        // unregistered vectors never raise
        assert!(!intc.raise(6));
    }

    #[test]
    fn test_next_irq_priority_and_ack() {
        let mut intc = InterruptController::new(16, SignalId(0));
        intc.register(9, PeripheralId(0)).unwrap();
        intc.register(4, PeripheralId(1)).unwrap();
        intc.raise(9);
        intc.raise(4);
        assert_eq!(intc.next_irq(), Some(4));
        assert_eq!(intc.ack(4), Some(PeripheralId(1)));
        assert_eq!(intc.ack(4), None);
        assert_eq!(intc.next_irq(), Some(9));
        intc.reset();
        assert_eq!(intc.next_irq(), None);
        assert_eq!(intc.state(9), VectorState::Idle);
    }

    #[test]
    fn test_unregister_owner() {
        let mut intc = InterruptController::new(8, SignalId(0));
        intc.register(2, PeripheralId(4)).unwrap();
        intc.raise(2);
        intc.unregister_owner(PeripheralId(4));
        assert_eq!(intc.state(2), VectorState::Unused);
        assert!(intc.register(2, PeripheralId(5)).is_ok());
    }
}
