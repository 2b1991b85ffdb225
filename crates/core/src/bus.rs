//! Shared device context seen by peripherals.
//!
//! The [`Bus`] owns everything peripherals reference by id: the signal bus,
//! the pins, the I/O register file and the interrupt controller, plus the
//! non-peripheral hooks (wires and probes). It also queues [`CoreRequest`]s
//! that the device handles once the current operation has settled.
//!
//! Raising methods here only fill the signal delivery list. Peripherals go
//! through the [`Ctx`](crate::peripheral::Ctx) wrappers of the same name,
//! which deliver before returning.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::interrupt::{InterruptController, SIG_INT_CANCELLED, SIG_INT_RAISED};
use crate::ioreg::RegisterFile;
use crate::pin::{Pin, PinId, PinRegistry, PinState, SIG_DIGITAL_STATE, SIG_DRIVE, SIG_VOLTAGE};
use crate::signal::{SignalBus, SignalId, SignalProbe};
use crate::types::{CtlId, IntVect, RegAddr};

/// Requests from peripherals to the device core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreRequest {
    /// A pin was driven to opposite levels from both sides.
    PinShorted(PinId),
    /// Unrecoverable condition, the device stops.
    Crash { reason: u16, text: String },
    /// Software reset with the given reset flags.
    Reset(u8),
    /// A complete line of console output.
    ConsoleLine(String),
    /// Halt (true) or resume (false) the device.
    Halt(bool),
}

pub const CRASH_INVALID_CONFIG: u16 = 1;

/// Forwards the MCU-side drive of one pin to the board side of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wire {
    pub from: PinId,
    pub to: PinId,
}

pub struct Bus {
    name: String,
    pub signals: SignalBus,
    pub pins: PinRegistry,
    pub regs: RegisterFile,
    pub intc: InterruptController,
    pub wires: Vec<Wire>,
    pub probes: Vec<SignalProbe>,
    requests: VecDeque<CoreRequest>,
    /// Peripherals whose handler is on the call stack, innermost last.
    busy: Vec<CtlId>,
    steps: usize,
    max_steps: usize,
    runaway: bool,
}

impl Bus {
    pub fn new(name: &str, pin_names: &[&str], io_end: RegAddr, vector_count: usize) -> Self {
        let mut signals = SignalBus::new();
        let intc_signal = signals.new_signal();
        let mut pins = PinRegistry::new();
        for &p in pin_names {
            let sig = signals.new_signal();
            pins.add(Pin::new(p, sig));
        }
        Bus {
            name: name.to_string(),
            signals,
            pins,
            regs: RegisterFile::new(io_end),
            intc: InterruptController::new(vector_count, intc_signal),
            wires: Vec::new(),
            probes: Vec::new(),
            requests: VecDeque::new(),
            busy: Vec::new(),
            steps: 0,
            max_steps: usize::MAX,
            runaway: false,
        }
    }

    /// Device name, carried by every log event.
    pub fn name(&self) -> &str {
        &self.name
    }

    // --- Registers (peripheral side, no handlers) ---

    #[inline(always)]
    pub fn read_ioreg(&self, addr: RegAddr) -> u8 {
        self.regs.value(addr)
    }

    #[inline(always)]
    pub fn write_ioreg(&mut self, addr: RegAddr, v: u8) {
        self.regs.set_value(addr, v);
    }

    pub fn test_ioreg(&self, addr: RegAddr, bit: u8) -> bool {
        (self.regs.value(addr) >> bit) & 1 != 0
    }

    pub fn set_ioreg(&mut self, addr: RegAddr, bit: u8) {
        let v = self.regs.value(addr) | (1 << bit);
        self.regs.set_value(addr, v);
    }

    pub fn clear_ioreg(&mut self, addr: RegAddr, bit: u8) {
        let v = self.regs.value(addr) & !(1 << bit);
        self.regs.set_value(addr, v);
    }

    pub fn write_ioreg_bit(&mut self, addr: RegAddr, bit: u8, on: bool) {
        if on {
            self.set_ioreg(addr, bit);
        } else {
            self.clear_ioreg(addr, bit);
        }
    }

    // --- Interrupts ---

    pub fn raise_interrupt(&mut self, vector: IntVect) {
        if self.intc.raise(vector) {
            trace!(device = %self.name, vector, "interrupt raised");
            let sig = self.intc.signal();
            self.signals.raise_u(sig, SIG_INT_RAISED, vector as u32, 0);
        }
    }

    pub fn cancel_interrupt(&mut self, vector: IntVect) {
        if self.intc.cancel(vector) {
            trace!(device = %self.name, vector, "interrupt cancelled");
            let sig = self.intc.signal();
            self.signals.raise_u(sig, SIG_INT_CANCELLED, vector as u32, 0);
        }
    }

    pub fn interrupt_raised(&self, vector: IntVect) -> bool {
        self.intc.is_raised(vector)
    }

    // --- Pins ---

    pub fn find_pin(&self, name: &str) -> Option<PinId> {
        self.pins.find(name)
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.pins.get(id)
    }

    pub fn pin_state(&self, id: PinId) -> Option<PinState> {
        self.pins.get(id).map(|p| p.state())
    }

    pub fn pin_voltage(&self, id: PinId) -> Option<f64> {
        self.pins.get(id).map(|p| p.voltage())
    }

    pub fn pin_signal(&self, id: PinId) -> Option<SignalId> {
        self.pins.get(id).map(|p| p.signal())
    }

    /// Drive a pin from the MCU side.
    pub fn set_pin_internal_state(&mut self, id: PinId, state: PinState) {
        let Some(pin) = self.pins.get_mut(id) else { return };
        if !pin.set_internal(state) {
            return;
        }
        let sig = pin.signal();
        self.signals.raise_u(sig, SIG_DRIVE, 0, state.code());
        self.update_pin(id);
    }

    /// Drive a pin from the board side. `voltage` is only used for [`PinState::Analog`].
    pub fn set_pin_external_state(&mut self, id: PinId, state: PinState, voltage: f64) {
        let Some(pin) = self.pins.get_mut(id) else { return };
        pin.set_external(state, voltage);
        self.update_pin(id);
    }

    fn update_pin(&mut self, id: PinId) {
        let Some(pin) = self.pins.get_mut(id) else { return };
        let change = pin.update();
        let (sig, state, voltage) = (pin.signal(), pin.state(), pin.voltage());
        if change.state {
            debug!(device = %self.name, pin = pin.name(), %state, "pin state changed");
            self.signals.raise_u(sig, SIG_DIGITAL_STATE, 0, state.code());
        }
        if change.voltage {
            self.signals.raise_d(sig, SIG_VOLTAGE, 0, voltage);
        }
    }

    // --- Propagation accounting ---

    pub(crate) fn enter(&mut self, id: CtlId) {
        self.busy.push(id);
    }

    pub(crate) fn leave(&mut self) {
        self.busy.pop();
    }

    /// Is a handler of `id` running further up the call stack?
    pub fn is_busy(&self, id: CtlId) -> bool {
        self.busy.contains(&id)
    }

    pub fn set_max_steps(&mut self, max: usize) {
        self.max_steps = max;
    }

    /// Count one delivery. Returns false, and latches the runaway flag, once
    /// the bound is exceeded; nothing is counted after that.
    pub fn tick(&mut self) -> bool {
        if self.runaway {
            return false;
        }
        self.steps += 1;
        if self.steps > self.max_steps {
            self.runaway = true;
        }
        !self.runaway
    }

    pub fn runaway(&self) -> bool {
        self.runaway
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Close the accounting of one top-level operation. Returns the delivery count.
    pub fn finish_propagation(&mut self) -> usize {
        self.runaway = false;
        std::mem::take(&mut self.steps)
    }

    // --- Core requests ---

    pub fn post(&mut self, req: CoreRequest) {
        self.requests.push_back(req);
    }

    pub fn next_request(&mut self) -> Option<CoreRequest> {
        self.requests.pop_front()
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::HookId;

    #[test]
    fn test_pin_drive_raises_once() {
        let mut bus = Bus::new("test", &["PA0"], 0xFF, 4);
        let pa0 = bus.find_pin("PA0").unwrap();
        let sig = bus.pin_signal(pa0).unwrap();
        bus.signals.connect(sig, HookId::Probe(0), 0);

        bus.set_pin_internal_state(pa0, PinState::High);
        // drive, state, voltage
        assert_eq!(bus.signals.pending(), 3);
        bus.signals.clear_pending();

        bus.set_pin_internal_state(pa0, PinState::High);
        assert_eq!(bus.signals.pending(), 0);

        // external pull-up does not change a driven pin
        bus.set_pin_external_state(pa0, PinState::PullUp, 0.0);
        assert_eq!(bus.signals.pending(), 0);
        assert_eq!(bus.pin_state(pa0), Some(PinState::High));
    }

    #[test]
    fn test_interrupt_signal() {
        let mut bus = Bus::new("test", &[], 0xFF, 4);
        bus.intc.register(2, crate::peripheral::PeripheralId(0)).unwrap();
        let sig = bus.intc.signal();
        bus.signals.connect(sig, HookId::Probe(0), 0);
        bus.raise_interrupt(2);
        bus.raise_interrupt(2);
        bus.cancel_interrupt(2);
        bus.cancel_interrupt(2);
        let n1 = bus.signals.next_notification().unwrap();
        let n2 = bus.signals.next_notification().unwrap();
        assert_eq!((n1.data.sigid, n1.data.index), (SIG_INT_RAISED, 2));
        assert_eq!(n2.data.sigid, SIG_INT_CANCELLED);
        assert!(bus.signals.next_notification().is_none());
    }

    #[test]
    fn test_step_bound_latches() {
        let mut bus = Bus::new("test", &[], 0xFF, 1);
        bus.set_max_steps(2);
        assert!(bus.tick());
        assert!(bus.tick());
        assert!(!bus.tick());
        assert!(!bus.tick());
        assert!(bus.runaway());
        assert_eq!(bus.finish_propagation(), 3);
        assert!(!bus.runaway());
        assert!(bus.tick());
    }

    #[test]
    fn test_ioreg_bits() {
        let mut bus = Bus::new("test", &[], 0xFF, 1);
        bus.set_ioreg(0x40, 3);
        bus.write_ioreg_bit(0x40, 0, true);
        assert_eq!(bus.read_ioreg(0x40), 0x09);
        bus.clear_ioreg(0x40, 3);
        assert!(!bus.test_ioreg(0x40, 3));
        assert!(bus.test_ioreg(0x40, 0));
    }
}
