//! GPIO port of the classic AVR cores (ATmega328P and friends).
//!
//! Three registers: PINx (input levels, writing 1 toggles PORTx), DDRx and
//! PORTx. An input with PORTx set has its pull-up enabled. No interrupts.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::ioreg::IoRegWrite;
use crate::peripheral::{Ctx, CtlData, CtlReq, Peripheral};
use crate::peripherals::port::{PortBase, PortBaseState};
use crate::pin::PinState;
use crate::signal::SignalData;
use crate::types::{CtlId, RegAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassicPortConfig {
    /// Address of PINx. DDRx and PORTx follow.
    pub reg_pin: RegAddr,
}

impl ClassicPortConfig {
    pub fn reg_ddr(&self) -> RegAddr {
        self.reg_pin + 1
    }

    pub fn reg_port(&self) -> RegAddr {
        self.reg_pin + 2
    }
}

#[derive(Serialize, Deserialize)]
struct ClassicPortState {
    base: PortBaseState,
    ddr: u8,
    port: u8,
}

pub struct ClassicPort {
    base: PortBase,
    config: ClassicPortConfig,
    ddr: u8,
    port: u8,
}

impl ClassicPort {
    pub fn new(name: char, config: ClassicPortConfig) -> Self {
        ClassicPort { base: PortBase::new(name), config, ddr: 0, port: 0 }
    }

    fn update_pin_states(&self, ctx: &mut Ctx<'_>) {
        for i in 0..8u8 {
            let state = match ((self.ddr >> i) & 1, (self.port >> i) & 1) {
                (1, 1) => PinState::High,
                (1, _) => PinState::Low,
                (_, 1) => PinState::PullUp,
                _ => PinState::Floating,
            };
            self.base.set_pin_internal_state(ctx, i, state);
        }
    }
}

impl Peripheral for ClassicPort {
    fn ctl_id(&self) -> CtlId {
        self.base.ctl_id()
    }

    fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.base.init(ctx)?;
        let mask = self.base.pin_mask();
        ctx.add_ioreg(self.config.reg_pin, mask, 0)?;
        ctx.add_ioreg(self.config.reg_ddr(), mask, 0)?;
        ctx.add_ioreg(self.config.reg_port(), mask, 0)
    }

    fn reset(&mut self, ctx: &mut Ctx<'_>) {
        self.base.reset(ctx);
        self.ddr = 0;
        self.port = 0;
        let sampled = self.base.sample(ctx);
        ctx.write_ioreg(self.config.reg_pin, sampled);
    }

    fn ctlreq(&mut self, _ctx: &mut Ctx<'_>, req: CtlReq, data: &mut CtlData) -> bool {
        self.base.ctlreq(req, data)
    }

    fn ioreg_read_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr) {
        if addr == self.config.reg_pin {
            let sampled = self.base.sample(ctx);
            ctx.write_ioreg(addr, sampled);
        }
    }

    fn ioreg_write_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        let v = data.value & self.base.pin_mask();
        if addr == self.config.reg_pin {
            // writing PINx toggles PORTx, the input value stays
            self.port ^= v;
            ctx.write_ioreg(self.config.reg_port(), self.port);
            ctx.write_ioreg(addr, data.old);
        } else if addr == self.config.reg_ddr() {
            self.ddr = v;
        } else if addr == self.config.reg_port() {
            self.port = v;
        }
        self.update_pin_states(ctx);
    }

    fn raised(&mut self, ctx: &mut Ctx<'_>, sigdata: &SignalData, tag: u32) {
        let Some((num, state)) = self.base.pin_notification(sigdata, tag) else { return };
        if self.base.pin_state_changed(ctx, num, state) {
            ctx.write_ioreg_bit(self.config.reg_pin, num, state.level());
        }
    }

    fn save_state(&self) -> SimResult<Vec<u8>> {
        let st = ClassicPortState { base: self.base.save(), ddr: self.ddr, port: self.port };
        bincode::serialize(&st).map_err(|e| SimError::Snapshot(e.to_string()))
    }

    fn load_state(&mut self, _ctx: &mut Ctx<'_>, state: &[u8]) -> SimResult<()> {
        let st: ClassicPortState = bincode::deserialize(state).map_err(|e| SimError::Snapshot(e.to_string()))?;
        self.base.load(&st.base);
        self.ddr = st.ddr;
        self.port = st.port;
        Ok(())
    }
}
