//! Generic GPIO port: pin lookup, pin drive and pin-change bookkeeping
//! shared by every silicon family.
//!
//! A port owns up to 8 pins named `P<letter><bit>`; the pins found on the
//! device form the pin mask. A port never touches a pin outside its mask.
//! The port publishes its input byte on a signal (sigid 0, index 0).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::CoreRequest;
use crate::error::SimResult;
use crate::peripheral::{Ctx, CtlData, CtlReq, CTLREQ_GET_SIGNAL};
use crate::pin::{PinId, PinState, SIG_DIGITAL_STATE};
use crate::signal::{SignalData, SignalId};
use crate::types::{CtlId, VarData};

pub const SIG_PORT_VALUE: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PortBaseState {
    pub port_value: u8,
}

pub struct PortBase {
    name: char,
    pins: [Option<PinId>; 8],
    pinmask: u8,
    port_value: u8,
    signal: Option<SignalId>,
}

impl PortBase {
    pub fn new(name: char) -> Self {
        PortBase { name, pins: [None; 8], pinmask: 0, port_value: 0, signal: None }
    }

    pub fn ctl_id(&self) -> CtlId {
        CtlId::port(self.name)
    }

    pub fn name(&self) -> char {
        self.name
    }

    pub fn pin_mask(&self) -> u8 {
        self.pinmask
    }

    pub fn pin(&self, num: u8) -> Option<PinId> {
        self.pins.get(num as usize).copied().flatten()
    }

    /// Last byte published on the port signal (1 = pin High).
    pub fn port_value(&self) -> u8 {
        self.port_value
    }

    pub fn signal(&self) -> Option<SignalId> {
        self.signal
    }

    /// Look up the pins and subscribe to them, tagged with their bit number.
    pub fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.pinmask = 0;
        for i in 0..8u8 {
            let name = format!("P{}{}", self.name, i);
            self.pins[i as usize] = ctx.find_pin(&name);
            if let Some(id) = self.pins[i as usize] {
                if let Some(sig) = ctx.pin_signal(id) {
                    ctx.connect(sig, i as u32);
                }
                self.pinmask |= 1 << i;
            }
        }
        if self.signal.is_none() {
            self.signal = Some(ctx.new_signal());
        }
        debug!(device = %ctx.name(), port = %self.name, mask = self.pinmask, "port pins found");
        Ok(())
    }

    /// Release every pin and publish the resulting input byte.
    pub fn reset(&mut self, ctx: &mut Ctx<'_>) {
        for i in 0..8 {
            self.set_pin_internal_state(ctx, i, PinState::Floating);
        }
        self.port_value = self.sample(ctx);
        if let Some(sig) = self.signal {
            ctx.raise_u(sig, SIG_PORT_VALUE, 0, self.port_value as u32);
        }
    }

    /// Current pin levels, as they would be sensed by an input buffer.
    pub fn sample(&self, ctx: &Ctx<'_>) -> u8 {
        let mut v = 0;
        for (i, pin) in self.pins.iter().enumerate() {
            if let Some(id) = *pin {
                if ctx.pin_state(id).map_or(false, PinState::level) {
                    v |= 1 << i;
                }
            }
        }
        v
    }

    pub fn ctlreq(&mut self, req: CtlReq, data: &mut CtlData) -> bool {
        match (req, self.signal) {
            (CTLREQ_GET_SIGNAL, Some(sig)) => {
                data.data = VarData::Signal(sig);
                true
            }
            _ => false,
        }
    }

    /// Drive pin `num` from the MCU side. Pins outside the mask are ignored.
    pub fn set_pin_internal_state(&self, ctx: &mut Ctx<'_>, num: u8, state: PinState) {
        if num < 8 && (self.pinmask >> num) & 1 != 0 {
            if let Some(id) = self.pins[num as usize] {
                ctx.set_pin_internal_state(id, state);
            }
        }
    }

    /// Decode a pin notification into `(bit, state)`.
    pub fn pin_notification(&self, sigdata: &SignalData, tag: u32) -> Option<(u8, PinState)> {
        if sigdata.sigid != SIG_DIGITAL_STATE || tag >= 8 {
            return None;
        }
        Some((tag as u8, PinState::from_code(sigdata.data.as_uint())))
    }

    /// Shared pin-change handling. Returns false for a shorted pin, which is
    /// forwarded to the device and must not be processed further.
    pub fn pin_state_changed(&mut self, ctx: &mut Ctx<'_>, num: u8, state: PinState) -> bool {
        debug!(device = %ctx.name(), port = %self.name, pin = num, %state, "pin change detected");
        if state == PinState::Shorted {
            if let Some(id) = self.pin(num) {
                ctx.post(CoreRequest::PinShorted(id));
            }
            return false;
        }

        let value = if state.level() { self.port_value | (1 << num) } else { self.port_value & !(1 << num) };
        if value != self.port_value {
            self.port_value = value;
            if let Some(sig) = self.signal {
                ctx.raise_u(sig, SIG_PORT_VALUE, 0, value as u32);
            }
        }
        true
    }

    pub fn save(&self) -> PortBaseState {
        PortBaseState { port_value: self.port_value }
    }

    pub fn load(&mut self, state: &PortBaseState) {
        self.port_value = state.port_value;
    }
}
