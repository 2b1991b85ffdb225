//! Voltage reference controller.
//!
//! Holds the supply (VCC) and external reference (AREF) values given at
//! firmware load, and the internal reference selection of the 0-series
//! VREF block. Every value except VCC itself is exchanged as a ratio of VCC.
//!
//! ## Registers (offsets from `reg_base`)
//!
//! | Offset | Register | Fields                                   |
//! |--------|----------|------------------------------------------|
//! | 0x00   | CTRLA    | AC0REFSEL (bits 0–2), ADC0REFSEL (4–6)   |
//! | 0x01   | CTRLB    | AC0REFEN (bit 0), ADC0REFEN (bit 1)      |

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{CoreRequest, CRASH_INVALID_CONFIG};
use crate::error::{SimError, SimResult};
use crate::ioreg::IoRegWrite;
use crate::peripheral::{Ctx, CtlData, CtlReq, Peripheral, CTLREQ_GET_SIGNAL};
use crate::signal::SignalId;
use crate::types::{BitField, CtlId, RegAddr, VarData};

/// Reference seen by the ADC. `index` selects the [`Source`].
pub const CTLREQ_VREF_GET_ADC: CtlReq = 1;
/// Reference seen by the analog comparator. `index` selects the [`Source`].
pub const CTLREQ_VREF_GET_ACP: CtlReq = 2;
/// Set VCC (volts) or AREF (ratio, clipped to [0, 1]). `index` selects the [`Source`].
pub const CTLREQ_VREF_SET: CtlReq = 3;

// Signal ids
/// Reference of one user as a ratio of VCC, index = [`User`].
pub const SIG_VREF_REFERENCE: u16 = 0;
/// VCC in volts.
pub const SIG_VREF_VCC: u16 = 1;

pub const VREF_CTRLA: RegAddr = 0x00;
pub const VREF_CTRLB: RegAddr = 0x01;

pub const VREF_AC0REFSEL: BitField = BitField::new(0, 3);
pub const VREF_ADC0REFSEL: BitField = BitField::new(4, 3);
pub const VREF_AC0REFEN: BitField = BitField::bit(0);
pub const VREF_ADC0REFEN: BitField = BitField::bit(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ExtVcc = 0,
    /// Always equal to VCC.
    ExtAvcc = 1,
    ExtAref = 2,
    Internal = 3,
}

impl Source {
    pub fn from_index(i: u32) -> Option<Source> {
        match i {
            0 => Some(Source::ExtVcc),
            1 => Some(Source::ExtAvcc),
            2 => Some(Source::ExtAref),
            3 => Some(Source::Internal),
            _ => None,
        }
    }
}

/// Consumer of a reference. Also the index of the VREF signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum User {
    Adc = 0,
    Acp = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VrefConfig {
    pub reg_base: RegAddr,
}

#[derive(Serialize, Deserialize)]
struct VrefState {
    vcc: f64,
    aref: f64,
}

pub struct Vref {
    config: VrefConfig,
    vcc: f64,
    aref: f64,
    signal: Option<SignalId>,
}

impl Vref {
    pub fn new(config: VrefConfig) -> Self {
        Vref { config, vcc: 0.0, aref: 0.0, signal: None }
    }

    pub fn vcc(&self) -> f64 {
        self.vcc
    }

    pub fn aref(&self) -> f64 {
        self.aref
    }

    /// Internal reference selected for `user`, in volts.
    fn reference(&self, ctx: &Ctx<'_>, user: User) -> f64 {
        let ctrla = ctx.read_ioreg(self.config.reg_base + VREF_CTRLA);
        let sel = match user {
            User::Adc => VREF_ADC0REFSEL.extract(ctrla),
            User::Acp => VREF_AC0REFSEL.extract(ctrla),
        };
        match sel {
            0 => 0.55,
            1 => 1.1,
            2 => 2.5,
            3 => 4.3,
            4 => 1.5,
            7 => self.vcc,
            _ => 0.0,
        }
    }

    fn ratio(&self, ctx: &Ctx<'_>, user: User) -> f64 {
        if self.vcc > 0.0 {
            self.reference(ctx, user) / self.vcc
        } else {
            0.0
        }
    }

    fn raise(&self, ctx: &mut Ctx<'_>, user: User) {
        let Some(sig) = self.signal else { return };
        let r = self.ratio(ctx, user);
        ctx.raise_d(sig, SIG_VREF_REFERENCE, user as u32, r);
    }

    fn raise_vcc(&self, ctx: &mut Ctx<'_>) {
        if let Some(sig) = self.signal {
            ctx.raise_d(sig, SIG_VREF_VCC, 0, self.vcc);
        }
    }

    fn get(&self, ctx: &mut Ctx<'_>, user: User, data: &mut CtlData) -> bool {
        if self.vcc == 0.0 {
            ctx.post(CoreRequest::Crash {
                reason: CRASH_INVALID_CONFIG,
                text: "VCC not set for analog operations.".to_string(),
            });
            return true;
        }
        let v = match Source::from_index(data.index) {
            Some(Source::ExtVcc) => self.vcc,
            Some(Source::ExtAvcc) => 1.0,
            Some(Source::ExtAref) => self.aref,
            Some(Source::Internal) => self.reference(ctx, user) / self.vcc,
            None => return false,
        };
        data.data = VarData::Double(v);
        true
    }
}

impl Peripheral for Vref {
    fn ctl_id(&self) -> CtlId {
        CtlId::VREF
    }

    fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        ctx.add_ioreg(self.config.reg_base + VREF_CTRLA, VREF_AC0REFSEL.mask | VREF_ADC0REFSEL.mask, 0)?;
        ctx.add_ioreg(self.config.reg_base + VREF_CTRLB, VREF_AC0REFEN.mask | VREF_ADC0REFEN.mask, 0)?;
        self.signal = Some(ctx.new_signal());
        Ok(())
    }

    fn reset(&mut self, ctx: &mut Ctx<'_>) {
        self.raise_vcc(ctx);
        self.raise(ctx, User::Adc);
        self.raise(ctx, User::Acp);
    }

    fn ctlreq(&mut self, ctx: &mut Ctx<'_>, req: CtlReq, data: &mut CtlData) -> bool {
        match req {
            CTLREQ_GET_SIGNAL => match self.signal {
                Some(sig) => {
                    data.data = VarData::Signal(sig);
                    true
                }
                None => false,
            },
            CTLREQ_VREF_GET_ADC => self.get(ctx, User::Adc, data),
            CTLREQ_VREF_GET_ACP => self.get(ctx, User::Acp, data),
            CTLREQ_VREF_SET => {
                match Source::from_index(data.index) {
                    Some(Source::ExtVcc) => self.vcc = data.data.as_double().max(0.0),
                    Some(Source::ExtAref) => self.aref = data.data.as_double().clamp(0.0, 1.0),
                    _ => return false,
                }
                debug!(device = %ctx.name(), vcc = self.vcc, aref = self.aref, "reference set");
                self.raise_vcc(ctx);
                self.raise(ctx, User::Adc);
                self.raise(ctx, User::Acp);
                true
            }
            _ => false,
        }
    }

    fn ioreg_write_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        if addr != self.config.reg_base + VREF_CTRLA {
            return;
        }
        if VREF_ADC0REFSEL.extract(data.value) != VREF_ADC0REFSEL.extract(data.old) {
            self.raise(ctx, User::Adc);
        }
        if VREF_AC0REFSEL.extract(data.value) != VREF_AC0REFSEL.extract(data.old) {
            self.raise(ctx, User::Acp);
        }
    }

    fn save_state(&self) -> SimResult<Vec<u8>> {
        bincode::serialize(&VrefState { vcc: self.vcc, aref: self.aref }).map_err(|e| SimError::Snapshot(e.to_string()))
    }

    fn load_state(&mut self, _ctx: &mut Ctx<'_>, state: &[u8]) -> SimResult<()> {
        let st: VrefState = bincode::deserialize(state).map_err(|e| SimError::Snapshot(e.to_string()))?;
        self.vcc = st.vcc;
        self.aref = st.aref;
        Ok(())
    }
}
