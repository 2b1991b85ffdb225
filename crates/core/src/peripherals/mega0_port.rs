//! GPIO port of the megaAVR 0-series (ATmega4809 family).
//!
//! ## PORT registers (offsets from `reg_base_port`)
//!
//! | Offset    | Register           | Write effect                          |
//! |-----------|--------------------|---------------------------------------|
//! | 0x00      | DIR                | DIR = v & mask                        |
//! | 0x01–0x03 | DIRSET/CLR/TGL     | DIR \|= / &= ! / ^= v & mask, reads 0 |
//! | 0x04      | OUT                | OUT = v & mask                        |
//! | 0x05–0x07 | OUTSET/CLR/TGL     | OUT \|= / &= ! / ^= v & mask, reads 0 |
//! | 0x08      | IN                 | read-only                             |
//! | 0x09      | INTFLAGS           | write 1 to clear                      |
//! | 0x10–0x17 | PIN0CTRL–PIN7CTRL  | ISC (bits 0–2), PULLUPEN (bit 3)      |
//!
//! ## VPORT registers (offsets from `reg_base_vport`)
//!
//! DIR 0x00, OUT 0x01, IN 0x02, INTFLAGS 0x03: aliases of the PORT registers,
//! rewritten whenever the port changes any of them.

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::ioreg::IoRegWrite;
use crate::peripheral::{Ctx, CtlData, CtlReq, Peripheral};
use crate::peripherals::port::{PortBase, PortBaseState};
use crate::pin::PinState;
use crate::signal::SignalData;
use crate::types::{BitField, CtlId, IntVect, RegAddr};

pub const PORT_DIR: RegAddr = 0x00;
pub const PORT_DIRSET: RegAddr = 0x01;
pub const PORT_DIRCLR: RegAddr = 0x02;
pub const PORT_DIRTGL: RegAddr = 0x03;
pub const PORT_OUT: RegAddr = 0x04;
pub const PORT_OUTSET: RegAddr = 0x05;
pub const PORT_OUTCLR: RegAddr = 0x06;
pub const PORT_OUTTGL: RegAddr = 0x07;
pub const PORT_IN: RegAddr = 0x08;
pub const PORT_INTFLAGS: RegAddr = 0x09;
pub const PORT_PORTCTRL: RegAddr = 0x0A;
pub const PORT_PIN0CTRL: RegAddr = 0x10;
/// Size of the PORT register block.
pub const PORT_SIZE: RegAddr = 0x18;

pub const VPORT_DIR: RegAddr = 0x00;
pub const VPORT_OUT: RegAddr = 0x01;
pub const VPORT_IN: RegAddr = 0x02;
pub const VPORT_INTFLAGS: RegAddr = 0x03;

pub const PORT_ISC: BitField = BitField::new(0, 3);
pub const PORT_PULLUPEN: BitField = BitField::bit(3);

/// Input sense configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isc {
    IntDisable,
    BothEdges,
    Rising,
    Falling,
    InputDisable,
    Level,
}

impl Isc {
    pub fn from_bits(v: u8) -> Isc {
        match v & 0x07 {
            1 => Isc::BothEdges,
            2 => Isc::Rising,
            3 => Isc::Falling,
            4 => Isc::InputDisable,
            5 => Isc::Level,
            _ => Isc::IntDisable,
        }
    }

    /// Does a change of the input to `level` raise the flag?
    pub fn triggers(self, level: bool) -> bool {
        match self {
            Isc::BothEdges => true,
            Isc::Rising => level,
            Isc::Falling | Isc::Level => !level,
            Isc::IntDisable | Isc::InputDisable => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mega0PortConfig {
    pub reg_base_port: RegAddr,
    pub reg_base_vport: RegAddr,
    pub iv_port: IntVect,
}

#[derive(Serialize, Deserialize)]
struct Mega0PortState {
    base: PortBaseState,
    dir: u8,
    out: u8,
}

pub struct Mega0Port {
    base: PortBase,
    config: Mega0PortConfig,
    dir: u8,
    out: u8,
}

impl Mega0Port {
    pub fn new(name: char, config: Mega0PortConfig) -> Self {
        Mega0Port { base: PortBase::new(name), config, dir: 0, out: 0 }
    }

    pub fn pin_mask(&self) -> u8 {
        self.base.pin_mask()
    }

    #[inline(always)]
    fn port_reg(&self, ofs: RegAddr) -> RegAddr {
        self.config.reg_base_port + ofs
    }

    #[inline(always)]
    fn vport_reg(&self, ofs: RegAddr) -> RegAddr {
        self.config.reg_base_vport + ofs
    }

    fn is_port_reg(&self, addr: RegAddr) -> bool {
        addr >= self.config.reg_base_port && addr < self.config.reg_base_port + PORT_SIZE
    }

    fn pin_ctrl(&self, ctx: &Ctx<'_>, num: u8) -> u8 {
        ctx.read_ioreg(self.port_reg(PORT_PIN0CTRL + num as RegAddr))
    }

    /// Recompute the drive of every pin in the mask from DIR, OUT and PULLUPEN.
    fn update_pin_states(&self, ctx: &mut Ctx<'_>) {
        let mask = self.base.pin_mask();
        for i in 0..8u8 {
            if (mask >> i) & 1 == 0 {
                continue;
            }
            let state = if (self.dir >> i) & 1 != 0 {
                if (self.out >> i) & 1 != 0 { PinState::High } else { PinState::Low }
            } else if PORT_PULLUPEN.test(self.pin_ctrl(ctx, i)) {
                PinState::PullUp
            } else {
                PinState::Floating
            };
            self.base.set_pin_internal_state(ctx, i, state);
        }
    }

    fn write_port(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        let ofs = addr - self.config.reg_base_port;
        let v = data.value & self.base.pin_mask();
        match ofs {
            PORT_DIR => {
                self.dir = v;
                ctx.write_ioreg(addr, self.dir);
            }
            PORT_DIRSET | PORT_DIRCLR | PORT_DIRTGL => {
                self.dir = match ofs {
                    PORT_DIRSET => self.dir | v,
                    PORT_DIRCLR => self.dir & !v,
                    _ => self.dir ^ v,
                };
                let dir_addr = self.port_reg(PORT_DIR);
                ctx.write_ioreg(dir_addr, self.dir);
                ctx.write_ioreg(addr, 0);
            }
            PORT_OUT => {
                self.out = v;
                ctx.write_ioreg(addr, self.out);
            }
            PORT_OUTSET | PORT_OUTCLR | PORT_OUTTGL => {
                self.out = match ofs {
                    PORT_OUTSET => self.out | v,
                    PORT_OUTCLR => self.out & !v,
                    _ => self.out ^ v,
                };
                let out_addr = self.port_reg(PORT_OUT);
                ctx.write_ioreg(out_addr, self.out);
                ctx.write_ioreg(addr, 0);
            }
            PORT_INTFLAGS => {
                let flags = data.old & !data.value;
                ctx.write_ioreg(addr, flags);
                if flags == 0 {
                    ctx.cancel_interrupt(self.config.iv_port);
                }
            }
            o if (PORT_PIN0CTRL..PORT_PIN0CTRL + 8).contains(&o) => {
                let num = (o - PORT_PIN0CTRL) as u8;
                if (self.base.pin_mask() >> num) & 1 != 0 {
                    self.pin_ctrl_changed(ctx, num, data.value);
                } else {
                    ctx.write_ioreg(addr, 0);
                }
            }
            _ => {}
        }
        self.update_pin_states(ctx);
        self.refresh_vport(ctx);
    }

    /// A level-sensing pin that currently reads 0 flags immediately.
    fn pin_ctrl_changed(&mut self, ctx: &mut Ctx<'_>, num: u8, ctrl: u8) {
        let in_addr = self.port_reg(PORT_IN);
        let flags_addr = self.port_reg(PORT_INTFLAGS);
        if Isc::from_bits(PORT_ISC.extract(ctrl)) == Isc::Level && !ctx.test_ioreg(in_addr, num) {
            ctx.set_ioreg(flags_addr, num);
            ctx.raise_interrupt(self.config.iv_port);
        } else if ctx.read_ioreg(flags_addr) == 0 {
            ctx.cancel_interrupt(self.config.iv_port);
        }
    }

    /// Route a VPORT write to the matching PORT register.
    fn write_vport(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        let target = match addr - self.config.reg_base_vport {
            VPORT_DIR => PORT_DIR,
            VPORT_OUT => PORT_OUT,
            VPORT_INTFLAGS => PORT_INTFLAGS,
            _ => return,
        };
        let port_addr = self.port_reg(target);
        let old = ctx.read_ioreg(port_addr);
        self.write_port(ctx, port_addr, IoRegWrite { value: data.value, old });
    }

    fn refresh_vport(&self, ctx: &mut Ctx<'_>) {
        for (v, p) in [(VPORT_DIR, PORT_DIR), (VPORT_OUT, PORT_OUT), (VPORT_IN, PORT_IN), (VPORT_INTFLAGS, PORT_INTFLAGS)] {
            let value = ctx.read_ioreg(self.port_reg(p));
            ctx.write_ioreg(self.vport_reg(v), value);
        }
    }

    fn pin_state_changed(&mut self, ctx: &mut Ctx<'_>, num: u8, state: PinState) {
        if !self.base.pin_state_changed(ctx, num, state) {
            return;
        }

        let in_addr = self.port_reg(PORT_IN);
        let level = state.level();
        if ctx.test_ioreg(in_addr, num) == level {
            return;
        }
        ctx.write_ioreg_bit(in_addr, num, level);

        let isc = Isc::from_bits(PORT_ISC.extract(self.pin_ctrl(ctx, num)));
        if isc == Isc::InputDisable {
            return;
        }

        let flags_addr = self.port_reg(PORT_INTFLAGS);
        if isc.triggers(level) && !ctx.test_ioreg(flags_addr, num) {
            ctx.set_ioreg(flags_addr, num);
            ctx.raise_interrupt(self.config.iv_port);
        }
    }
}

impl Peripheral for Mega0Port {
    fn ctl_id(&self) -> CtlId {
        self.base.ctl_id()
    }

    fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.base.init(ctx)?;

        for ofs in [PORT_DIR, PORT_DIRSET, PORT_DIRCLR, PORT_DIRTGL, PORT_OUT, PORT_OUTSET, PORT_OUTCLR, PORT_OUTTGL] {
            ctx.add_ioreg(self.port_reg(ofs), 0xFF, 0)?;
        }
        ctx.add_ioreg(self.port_reg(PORT_IN), 0xFF, 0xFF)?;
        ctx.add_ioreg(self.port_reg(PORT_INTFLAGS), 0xFF, 0)?;
        // PORTCTRL is not implemented and stays plain storage
        for i in 0..8 {
            ctx.add_ioreg(self.port_reg(PORT_PIN0CTRL + i), PORT_ISC.mask | PORT_PULLUPEN.mask, 0)?;
        }

        ctx.add_ioreg(self.vport_reg(VPORT_DIR), 0xFF, 0)?;
        ctx.add_ioreg(self.vport_reg(VPORT_OUT), 0xFF, 0)?;
        ctx.add_ioreg(self.vport_reg(VPORT_IN), 0xFF, 0xFF)?;
        ctx.add_ioreg(self.vport_reg(VPORT_INTFLAGS), 0xFF, 0)?;

        ctx.register_interrupt(self.config.iv_port)
    }

    fn reset(&mut self, ctx: &mut Ctx<'_>) {
        self.base.reset(ctx);
        self.dir = 0;
        self.out = 0;
        let sampled = self.base.sample(ctx);
        let in_addr = self.port_reg(PORT_IN);
        ctx.write_ioreg(in_addr, sampled);
        self.refresh_vport(ctx);
    }

    fn ctlreq(&mut self, _ctx: &mut Ctx<'_>, req: CtlReq, data: &mut CtlData) -> bool {
        self.base.ctlreq(req, data)
    }

    fn ioreg_write_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        if self.is_port_reg(addr) {
            self.write_port(ctx, addr, data);
        } else {
            self.write_vport(ctx, addr, data);
        }
    }

    fn raised(&mut self, ctx: &mut Ctx<'_>, sigdata: &SignalData, tag: u32) {
        if let Some((num, state)) = self.base.pin_notification(sigdata, tag) {
            self.pin_state_changed(ctx, num, state);
            self.refresh_vport(ctx);
        }
    }

    /// The request stays asserted as long as a flag is set.
    fn interrupt_ack_handler(&mut self, ctx: &mut Ctx<'_>, vector: IntVect) {
        if vector == self.config.iv_port && ctx.read_ioreg(self.port_reg(PORT_INTFLAGS)) != 0 {
            ctx.raise_interrupt(vector);
        }
    }

    fn save_state(&self) -> SimResult<Vec<u8>> {
        let st = Mega0PortState { base: self.base.save(), dir: self.dir, out: self.out };
        bincode::serialize(&st).map_err(|e| SimError::Snapshot(e.to_string()))
    }

    fn load_state(&mut self, _ctx: &mut Ctx<'_>, state: &[u8]) -> SimResult<()> {
        let st: Mega0PortState = bincode::deserialize(state).map_err(|e| SimError::Snapshot(e.to_string()))?;
        self.base.load(&st.base);
        self.dir = st.dir;
        self.out = st.out;
        Ok(())
    }
}
