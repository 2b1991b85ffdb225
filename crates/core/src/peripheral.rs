//! Peripheral trait and the context handed to its handlers.
//!
//! While one of its handlers runs, a peripheral is taken out of the device
//! slot list. The [`Ctx`] gives it mutable access to the [`Bus`] and to the
//! other peripherals, which it can reach only through control requests and
//! signals.
//!
//! Signal delivery is synchronous: every raising method of [`Ctx`] hands the
//! notifications to their hooks, depth first, before returning. A hook whose
//! handler is already on the call stack gets its notification right after
//! that handler returns.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::Bus;
use crate::error::SimResult;
use crate::ioreg::IoRegWrite;
use crate::pin::{PinId, PinState, SIG_DRIVE};
use crate::signal::{HookId, Notification, SignalData, SignalId};
use crate::types::{CtlId, IntVect, RegAddr, VarData};

/// Slot index of a peripheral in its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(pub usize);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type CtlReq = u16;

/// Request understood by every peripheral that publishes a signal.
pub const CTLREQ_GET_SIGNAL: CtlReq = 0;

/// Argument and result of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CtlData {
    pub data: VarData,
    pub index: u32,
}

impl CtlData {
    pub fn new(data: VarData, index: u32) -> Self {
        CtlData { data, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SleepMode {
    #[default]
    Active,
    Idle,
    Standby,
    PowerDown,
    /// Infinite loop with interrupts disabled.
    Pseudo,
}

pub trait Peripheral {
    fn ctl_id(&self) -> CtlId;

    /// Claim registers, connect to pins and signals, register vectors.
    fn init(&mut self, _ctx: &mut Ctx<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Called on every device reset, after the register file is zeroed.
    fn reset(&mut self, _ctx: &mut Ctx<'_>) {}

    fn ctlreq(&mut self, _ctx: &mut Ctx<'_>, _req: CtlReq, _data: &mut CtlData) -> bool {
        false
    }

    fn ioreg_read_handler(&mut self, _ctx: &mut Ctx<'_>, _addr: RegAddr) {}

    fn ioreg_write_handler(&mut self, _ctx: &mut Ctx<'_>, _addr: RegAddr, _data: IoRegWrite) {}

    fn sleep(&mut self, _ctx: &mut Ctx<'_>, _on: bool, _mode: SleepMode) {}

    /// Signal notification, with the tag given at connection.
    fn raised(&mut self, _ctx: &mut Ctx<'_>, _sigdata: &SignalData, _tag: u32) {}

    fn interrupt_ack_handler(&mut self, _ctx: &mut Ctx<'_>, _vector: IntVect) {}

    /// Private state for snapshots. Register values are saved by the device.
    fn save_state(&self) -> SimResult<Vec<u8>> {
        Ok(Vec::new())
    }

    fn load_state(&mut self, _ctx: &mut Ctx<'_>, _state: &[u8]) -> SimResult<()> {
        Ok(())
    }
}

pub type PeripheralSlot = Option<Box<dyn Peripheral>>;

pub struct Ctx<'a> {
    bus: &'a mut Bus,
    peers: &'a mut [PeripheralSlot],
    me: PeripheralId,
}

impl<'a> Ctx<'a> {
    pub fn new(bus: &'a mut Bus, peers: &'a mut [PeripheralSlot], me: PeripheralId) -> Self {
        Ctx { bus, peers, me }
    }

    pub fn me(&self) -> PeripheralId {
        self.me
    }

    pub fn hook(&self) -> HookId {
        HookId::Peripheral(self.me)
    }

    pub fn add_ioreg(&mut self, addr: RegAddr, use_mask: u8, ro_mask: u8) -> SimResult<()> {
        self.bus.regs.claim(addr, self.me, use_mask, ro_mask)
    }

    pub fn register_interrupt(&mut self, vector: IntVect) -> SimResult<()> {
        self.bus.intc.register(vector, self.me)
    }

    pub fn new_signal(&mut self) -> SignalId {
        self.bus.signals.new_signal()
    }

    pub fn connect(&mut self, sig: SignalId, tag: u32) {
        let hook = self.hook();
        self.bus.signals.connect(sig, hook, tag);
    }

    pub fn disconnect(&mut self, sig: SignalId) {
        let hook = self.hook();
        self.bus.signals.disconnect(sig, hook);
    }

    // --- Raising, delivered before returning ---

    fn deliver_since(&mut self, mark: usize) {
        deliver_since(&mut *self.bus, &mut *self.peers, mark);
    }

    pub fn raise(&mut self, sig: SignalId, data: SignalData) {
        let mark = self.bus.signals.pending();
        self.bus.signals.raise(sig, data);
        self.deliver_since(mark);
    }

    pub fn raise_u(&mut self, sig: SignalId, sigid: u16, index: u32, u: u32) {
        self.raise(sig, SignalData { sigid, index, data: VarData::Uint(u) });
    }

    pub fn raise_d(&mut self, sig: SignalId, sigid: u16, index: u32, d: f64) {
        self.raise(sig, SignalData { sigid, index, data: VarData::Double(d) });
    }

    pub fn raise_interrupt(&mut self, vector: IntVect) {
        let mark = self.bus.signals.pending();
        self.bus.raise_interrupt(vector);
        self.deliver_since(mark);
    }

    pub fn cancel_interrupt(&mut self, vector: IntVect) {
        let mark = self.bus.signals.pending();
        self.bus.cancel_interrupt(vector);
        self.deliver_since(mark);
    }

    pub fn set_pin_internal_state(&mut self, id: PinId, state: PinState) {
        let mark = self.bus.signals.pending();
        self.bus.set_pin_internal_state(id, state);
        self.deliver_since(mark);
    }

    pub fn set_pin_external_state(&mut self, id: PinId, state: PinState, voltage: f64) {
        let mark = self.bus.signals.pending();
        self.bus.set_pin_external_state(id, state, voltage);
        self.deliver_since(mark);
    }

    /// Send a request to another peripheral. Returns false if it is absent
    /// or does not handle the request.
    pub fn ctlreq(&mut self, target: CtlId, req: CtlReq, data: &mut CtlData) -> bool {
        if self.bus.is_busy(target) {
            debug!(device = %self.bus.name(), peripheral = %target, req, "request to a peripheral in a handler");
            return false;
        }
        let slot = self
            .peers
            .iter()
            .position(|p| p.as_ref().map_or(false, |p| p.ctl_id() == target));
        let Some(i) = slot else {
            warn!(device = %self.bus.name(), peripheral = %target, "request to missing peripheral");
            return false;
        };
        run_on(&mut *self.bus, &mut *self.peers, PeripheralId(i), |p, ctx| p.ctlreq(ctx, req, data))
            .unwrap_or(false)
    }

    /// Fetch the signal published by another peripheral.
    pub fn get_signal(&mut self, target: CtlId, index: u32) -> Option<SignalId> {
        let mut d = CtlData::new(VarData::Invalid, index);
        if self.ctlreq(target, CTLREQ_GET_SIGNAL, &mut d) {
            d.data.as_signal()
        } else {
            None
        }
    }
}

impl Deref for Ctx<'_> {
    type Target = Bus;

    fn deref(&self) -> &Bus {
        self.bus
    }
}

impl DerefMut for Ctx<'_> {
    fn deref_mut(&mut self) -> &mut Bus {
        self.bus
    }
}

// ─── Delivery ───────────────────────────────────────────────────────────────

/// Run `f` on peripheral `pid`, taken out of its slot for the duration.
/// Notifications that reached it meanwhile are handed over once it is back.
/// Returns None if the slot is empty.
pub(crate) fn run_on<R>(
    bus: &mut Bus,
    peers: &mut [PeripheralSlot],
    pid: PeripheralId,
    f: impl FnOnce(&mut dyn Peripheral, &mut Ctx<'_>) -> R,
) -> Option<R> {
    let r = invoke(bus, peers, pid, f)?;
    let hook = HookId::Peripheral(pid);
    while let Some(n) = bus.signals.take_deferred(hook) {
        if !bus.tick() {
            break;
        }
        invoke(bus, peers, pid, |p, ctx| p.raised(ctx, &n.data, n.tag));
    }
    Some(r)
}

fn invoke<R>(
    bus: &mut Bus,
    peers: &mut [PeripheralSlot],
    pid: PeripheralId,
    f: impl FnOnce(&mut dyn Peripheral, &mut Ctx<'_>) -> R,
) -> Option<R> {
    let mut per = peers.get_mut(pid.0)?.take()?;
    bus.enter(per.ctl_id());
    let r = {
        let mut ctx = Ctx::new(&mut *bus, &mut *peers, pid);
        f(&mut *per, &mut ctx)
    };
    bus.leave();
    peers[pid.0] = Some(per);
    Some(r)
}

/// Deliver the notifications raised since `mark`, in raise order.
pub(crate) fn deliver_since(bus: &mut Bus, peers: &mut [PeripheralSlot], mark: usize) {
    for n in bus.signals.take_since(mark) {
        deliver(bus, peers, n);
    }
}

fn deliver(bus: &mut Bus, peers: &mut [PeripheralSlot], n: Notification) {
    // hooks detached by an earlier delivery of the same raise
    if bus.runaway() || !bus.signals.is_connected(n.signal, n.hook) {
        return;
    }
    match n.hook {
        HookId::Peripheral(pid) => {
            if peers.get(pid.0).map_or(true, Option::is_none) {
                bus.signals.defer(n);
            } else if bus.tick() {
                run_on(bus, peers, pid, |p, ctx| p.raised(ctx, &n.data, n.tag));
            }
        }
        HookId::Probe(i) => {
            if bus.tick() {
                if let Some(p) = bus.probes.get_mut(i) {
                    p.record(n.data);
                }
            }
        }
        HookId::Wire(i) => {
            if !bus.tick() || n.data.sigid != SIG_DRIVE {
                return;
            }
            let Some(w) = bus.wires.get(i).copied() else { return };
            let state = PinState::from_code(n.data.data.as_uint());
            let v = bus.pin_voltage(w.from).unwrap_or(0.0);
            let mark = bus.signals.pending();
            bus.set_pin_external_state(w.to, state, v);
            deliver_since(bus, peers, mark);
        }
    }
}
