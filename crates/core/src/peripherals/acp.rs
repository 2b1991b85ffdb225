//! Analog comparator of the megaAVR 0-series (AC0).
//!
//! Compares the voltages of two multiplexed channels, pins or the internal
//! DAC, with optional hysteresis and inversion. The output is mirrored in
//! STATUS.STATE and published on a signal; transitions selected by INTMODE
//! set the CMP flag.
//!
//! Voltages are ratios of VCC, so the comparator needs the VREF controller
//! for its DAC reference and to convert the hysteresis thresholds. VCC is
//! cached from the VREF signal, since VREF cannot answer requests while it
//! is raising that signal.
//!
//! The OUTEN bit is stored but the output is never driven to a pin.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SimError, SimResult};
use crate::interrupt::InterruptFlag;
use crate::ioreg::IoRegWrite;
use crate::peripheral::{Ctx, CtlData, CtlReq, Peripheral, SleepMode, CTLREQ_GET_SIGNAL};
use crate::peripherals::vref::{Source, CTLREQ_VREF_GET_ACP, SIG_VREF_REFERENCE, SIG_VREF_VCC};
use crate::pin::{PinId, SIG_VOLTAGE};
use crate::signal::{SignalData, SignalId};
use crate::types::{BitField, CtlId, IntVect, RegAddr, RegBit, VarData};

/// DAC output, as a ratio of VCC.
pub const CTLREQ_ACP_GET_DAC: CtlReq = 1;
/// Current comparator output (0 or 1).
pub const CTLREQ_ACP_GET_OUTPUT: CtlReq = 2;

pub const AC_CTRLA: RegAddr = 0x00;
pub const AC_MUXCTRLA: RegAddr = 0x02;
pub const AC_DACREF: RegAddr = 0x04;
pub const AC_INTCTRL: RegAddr = 0x06;
pub const AC_STATUS: RegAddr = 0x07;

pub const AC_ENABLE: BitField = BitField::bit(0);
pub const AC_HYSMODE: BitField = BitField::new(1, 2);
pub const AC_INTMODE: BitField = BitField::new(4, 2);
pub const AC_OUTEN: BitField = BitField::bit(6);
pub const AC_RUNSTDBY: BitField = BitField::bit(7);
pub const AC_MUXNEG: BitField = BitField::new(0, 2);
pub const AC_MUXPOS: BitField = BitField::new(3, 2);
pub const AC_INVERT: BitField = BitField::bit(7);
pub const AC_CMP: BitField = BitField::bit(0);
pub const AC_STATE: BitField = BitField::bit(4);

const TAG_POS: u32 = 0;
const TAG_NEG: u32 = 1;
const TAG_VREF: u32 = 2;

/// Hysteresis per HYSMODE, in volts.
const HYSTERESIS: [f64; 4] = [0.0, 0.010, 0.025, 0.050];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSource {
    /// A pin, by name.
    Pin(String),
    /// Internal DAC output.
    Dac,
    /// Ground.
    Zero,
}

/// One entry of a channel table: the mux field value selecting `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcpChannel {
    pub index: u8,
    pub source: ChannelSource,
}

impl AcpChannel {
    pub fn pin(index: u8, name: &str) -> Self {
        AcpChannel { index, source: ChannelSource::Pin(name.to_string()) }
    }

    pub fn dac(index: u8) -> Self {
        AcpChannel { index, source: ChannelSource::Dac }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcpConfig {
    pub pos_channels: Vec<AcpChannel>,
    pub neg_channels: Vec<AcpChannel>,
    /// Index of the VREF signal carrying the comparator reference.
    pub vref_channel: u32,
    pub reg_base: RegAddr,
    pub iv_cmp: IntVect,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Channel {
    Pin(PinId),
    Dac,
    Zero,
}

/// Channel selection, resolved against the device pins at init.
#[derive(Debug, Default)]
struct ChannelMux {
    channels: Vec<(u8, Channel)>,
    selected: Option<Channel>,
}

impl ChannelMux {
    fn build(ctx: &Ctx<'_>, table: &[AcpChannel]) -> SimResult<ChannelMux> {
        let mut channels = Vec::with_capacity(table.len());
        for c in table {
            let ch = match &c.source {
                ChannelSource::Pin(name) => {
                    Channel::Pin(ctx.find_pin(name).ok_or_else(|| SimError::PinNotFound(name.clone()))?)
                }
                ChannelSource::Dac => Channel::Dac,
                ChannelSource::Zero => Channel::Zero,
            };
            channels.push((c.index, ch));
        }
        Ok(ChannelMux { channels, selected: None })
    }

    fn selected_pin(&self) -> Option<PinId> {
        match self.selected {
            Some(Channel::Pin(id)) => Some(id),
            _ => None,
        }
    }

    fn select(&mut self, index: u8) {
        self.selected = self.channels.iter().find(|(i, _)| *i == index).map(|(_, c)| *c);
    }

    fn value(&self, ctx: &Ctx<'_>, dac: f64) -> f64 {
        match self.selected {
            Some(Channel::Pin(id)) => ctx.pin_voltage(id).unwrap_or(0.0),
            Some(Channel::Dac) => dac,
            Some(Channel::Zero) | None => 0.0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct AcpState {
    vcc: f64,
    vref: f64,
    dac: f64,
    hysteresis: f64,
    raw: bool,
    output: bool,
    sleeping: bool,
}

pub struct AnalogComparator {
    num: u8,
    config: AcpConfig,
    intflag: InterruptFlag,
    signal: Option<SignalId>,
    pos_mux: ChannelMux,
    neg_mux: ChannelMux,
    /// Supply voltage in volts, last published by VREF.
    vcc: f64,
    /// Comparator reference from VREF.
    vref: f64,
    dac: f64,
    hysteresis: f64,
    /// Comparison result before inversion.
    raw: bool,
    output: bool,
    sleeping: bool,
}

impl AnalogComparator {
    pub fn new(num: u8, config: AcpConfig) -> Self {
        AnalogComparator {
            num,
            config,
            intflag: InterruptFlag::new(false),
            signal: None,
            pos_mux: ChannelMux::default(),
            neg_mux: ChannelMux::default(),
            vcc: 0.0,
            vref: 0.0,
            dac: 0.0,
            hysteresis: 0.0,
            raw: false,
            output: false,
            sleeping: false,
        }
    }

    pub fn output(&self) -> bool {
        self.output
    }

    pub fn dac(&self) -> f64 {
        self.dac
    }

    #[inline(always)]
    fn reg(&self, ofs: RegAddr) -> RegAddr {
        self.config.reg_base + ofs
    }

    fn update_dac(&mut self, ctx: &Ctx<'_>) {
        let dacref = ctx.read_ioreg(self.reg(AC_DACREF));
        self.dac = self.vref * dacref as f64 / 256.0;
    }

    fn update_hysteresis(&mut self, ctx: &mut Ctx<'_>) {
        let mode = AC_HYSMODE.extract(ctx.read_ioreg(self.reg(AC_CTRLA)));
        if mode == 0 {
            self.hysteresis = 0.0;
            return;
        }
        let mut d = CtlData::new(VarData::Invalid, Source::ExtVcc as u32);
        if ctx.ctlreq(CtlId::VREF, CTLREQ_VREF_GET_ACP, &mut d) {
            if let VarData::Double(v) = d.data {
                self.vcc = v;
            }
        }
        self.hysteresis = if self.vcc > 0.0 { HYSTERESIS[mode as usize] / self.vcc } else { 0.0 };
    }

    /// Re-subscribe to the pins selected by MUXCTRLA.
    fn update_mux(&mut self, ctx: &mut Ctx<'_>) {
        for id in [self.pos_mux.selected_pin(), self.neg_mux.selected_pin()].into_iter().flatten() {
            if let Some(sig) = ctx.pin_signal(id) {
                ctx.disconnect(sig);
            }
        }
        let mux = ctx.read_ioreg(self.reg(AC_MUXCTRLA));
        self.pos_mux.select(AC_MUXPOS.extract(mux));
        self.neg_mux.select(AC_MUXNEG.extract(mux));
        for (id, tag) in [(self.pos_mux.selected_pin(), TAG_POS), (self.neg_mux.selected_pin(), TAG_NEG)] {
            if let Some(sig) = id.and_then(|id| ctx.pin_signal(id)) {
                ctx.connect(sig, tag);
            }
        }
    }

    fn update_output(&mut self, ctx: &mut Ctx<'_>) {
        if self.sleeping {
            return;
        }
        let ctrla = ctx.read_ioreg(self.reg(AC_CTRLA));
        let enabled = AC_ENABLE.test(ctrla);
        let output = if enabled {
            let pos = self.pos_mux.value(ctx, self.dac);
            let neg = self.neg_mux.value(ctx, self.dac);
            let threshold = if self.raw { neg - self.hysteresis / 2.0 } else { neg + self.hysteresis / 2.0 };
            self.raw = pos > threshold;
            self.raw ^ AC_INVERT.test(ctx.read_ioreg(self.reg(AC_MUXCTRLA)))
        } else {
            self.raw = false;
            false
        };

        if output == self.output {
            return;
        }
        self.output = output;

        let status = self.reg(AC_STATUS);
        ctx.write_ioreg_bit(status, AC_STATE.bit, output);
        if let Some(sig) = self.signal {
            ctx.raise_u(sig, 0, 0, output as u32);
        }

        let trigger = match AC_INTMODE.extract(ctrla) {
            0 => true,
            2 => !output,
            3 => output,
            _ => false,
        };
        if enabled && trigger {
            self.intflag.set_flag(ctx, 1);
        }
    }
}

impl Peripheral for AnalogComparator {
    fn ctl_id(&self) -> CtlId {
        CtlId::acp(self.num)
    }

    fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        self.pos_mux = ChannelMux::build(ctx, &self.config.pos_channels)?;
        self.neg_mux = ChannelMux::build(ctx, &self.config.neg_channels)?;

        ctx.add_ioreg(self.reg(AC_CTRLA), 0xF7, 0)?;
        ctx.add_ioreg(self.reg(AC_MUXCTRLA), AC_MUXNEG.mask | AC_MUXPOS.mask | AC_INVERT.mask, 0)?;
        ctx.add_ioreg(self.reg(AC_DACREF), 0xFF, 0)?;
        ctx.add_ioreg(self.reg(AC_INTCTRL), AC_CMP.mask, 0)?;
        ctx.add_ioreg(self.reg(AC_STATUS), AC_CMP.mask | AC_STATE.mask, AC_STATE.mask)?;

        let enable = RegBit { addr: self.reg(AC_INTCTRL), field: AC_CMP };
        let flag = RegBit { addr: self.reg(AC_STATUS), field: AC_CMP };
        self.intflag.init(ctx, enable, flag, Some(self.config.iv_cmp))?;

        let vref_sig = ctx.get_signal(CtlId::VREF, 0).ok_or(SimError::PeripheralNotFound(CtlId::VREF))?;
        ctx.connect(vref_sig, TAG_VREF);

        self.signal = Some(ctx.new_signal());
        Ok(())
    }

    fn reset(&mut self, ctx: &mut Ctx<'_>) {
        self.intflag.reset();
        self.sleeping = false;
        self.raw = false;
        self.output = false;
        self.hysteresis = 0.0;
        self.update_dac(ctx);
        self.update_mux(ctx);
        if let Some(sig) = self.signal {
            ctx.raise_u(sig, 0, 0, 0);
        }
    }

    fn ctlreq(&mut self, _ctx: &mut Ctx<'_>, req: CtlReq, data: &mut CtlData) -> bool {
        match req {
            CTLREQ_GET_SIGNAL => match self.signal {
                Some(sig) => {
                    data.data = VarData::Signal(sig);
                    true
                }
                None => false,
            },
            CTLREQ_ACP_GET_DAC => {
                data.data = VarData::Double(self.dac);
                true
            }
            CTLREQ_ACP_GET_OUTPUT => {
                data.data = VarData::Uint(self.output as u32);
                true
            }
            _ => false,
        }
    }

    fn ioreg_write_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        match addr - self.config.reg_base {
            AC_CTRLA => {
                self.update_hysteresis(ctx);
                self.update_output(ctx);
            }
            AC_MUXCTRLA => {
                self.update_mux(ctx);
                self.update_output(ctx);
            }
            AC_DACREF => {
                self.update_dac(ctx);
                self.update_output(ctx);
            }
            AC_INTCTRL => {
                self.intflag.update_from_ioreg(ctx);
            }
            AC_STATUS => {
                // CMP is write-one-to-clear, STATE is kept
                ctx.write_ioreg(addr, data.old);
                if AC_CMP.test(data.value) {
                    self.intflag.clear_flag(ctx, 1);
                }
            }
            _ => {}
        }
    }

    /// The output freezes in the modes that stop the comparator.
    fn sleep(&mut self, ctx: &mut Ctx<'_>, on: bool, mode: SleepMode) {
        if on {
            let stops = match mode {
                SleepMode::PowerDown => true,
                SleepMode::Standby => !AC_RUNSTDBY.test(ctx.read_ioreg(self.reg(AC_CTRLA))),
                _ => false,
            };
            if stops {
                debug!(device = %ctx.name(), comparator = self.num, "comparator stopped by sleep");
                self.sleeping = true;
            }
        } else if self.sleeping {
            debug!(device = %ctx.name(), comparator = self.num, "comparator resumed");
            self.sleeping = false;
            self.update_output(ctx);
        }
    }

    fn raised(&mut self, ctx: &mut Ctx<'_>, sigdata: &SignalData, tag: u32) {
        match tag {
            TAG_VREF if sigdata.sigid == SIG_VREF_VCC => {
                self.vcc = sigdata.data.as_double();
                self.update_hysteresis(ctx);
            }
            TAG_VREF if sigdata.sigid == SIG_VREF_REFERENCE => {
                if sigdata.index != self.config.vref_channel {
                    return;
                }
                self.vref = sigdata.data.as_double();
                self.update_dac(ctx);
                self.update_hysteresis(ctx);
                self.update_output(ctx);
            }
            TAG_POS | TAG_NEG if sigdata.sigid == SIG_VOLTAGE => self.update_output(ctx),
            _ => {}
        }
    }

    fn interrupt_ack_handler(&mut self, ctx: &mut Ctx<'_>, _vector: IntVect) {
        self.intflag.ack(ctx);
    }

    fn save_state(&self) -> SimResult<Vec<u8>> {
        let st = AcpState {
            vcc: self.vcc,
            vref: self.vref,
            dac: self.dac,
            hysteresis: self.hysteresis,
            raw: self.raw,
            output: self.output,
            sleeping: self.sleeping,
        };
        bincode::serialize(&st).map_err(|e| SimError::Snapshot(e.to_string()))
    }

    fn load_state(&mut self, ctx: &mut Ctx<'_>, state: &[u8]) -> SimResult<()> {
        let st: AcpState = bincode::deserialize(state).map_err(|e| SimError::Snapshot(e.to_string()))?;
        self.vcc = st.vcc;
        self.vref = st.vref;
        self.dac = st.dac;
        self.hysteresis = st.hysteresis;
        self.raw = st.raw;
        self.output = st.output;
        self.sleeping = st.sleeping;
        self.intflag.reset();
        self.intflag.update_from_ioreg(ctx);
        self.update_mux(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceConfig, DeviceState};
    use crate::interrupt::VectorState;
    use crate::firmware::{Firmware, MemBlock, MemoryArea};
    use crate::peripherals::vref::{User, Vref, VrefConfig, CTLREQ_VREF_SET};

    const BASE: RegAddr = 0x680;
    const IV: IntVect = 21;

    fn config() -> AcpConfig {
        AcpConfig {
            pos_channels: vec![AcpChannel::pin(0, "PD2"), AcpChannel::pin(1, "PD4")],
            neg_channels: vec![AcpChannel::pin(0, "PD3"), AcpChannel::dac(3)],
            vref_channel: User::Acp as u32,
            reg_base: BASE,
            iv_cmp: IV,
        }
    }

    fn device() -> Device {
        let mut dev = Device::new(DeviceConfig {
            name: "ac".into(),
            pins: ["PD2", "PD3", "PD4"].iter().map(|s| s.to_string()).collect(),
            io_end: 0x0FFF,
            vector_count: 32,
            flash_size: 16,
            fuse_size: 0,
            eeprom_size: 0,
        });
        dev.attach_peripheral(Box::new(Vref::new(VrefConfig { reg_base: 0xA0 }))).unwrap();
        dev.attach_peripheral(Box::new(AnalogComparator::new(0, config()))).unwrap();
        dev.init().unwrap();
        let mut d = CtlData::new(VarData::Double(5.0), Source::ExtVcc as u32);
        assert!(dev.ctlreq(CtlId::VREF, CTLREQ_VREF_SET, &mut d));
        dev
    }

    fn output(dev: &mut Device) -> u32 {
        let mut d = CtlData::default();
        assert!(dev.ctlreq(CtlId::acp(0), CTLREQ_ACP_GET_OUTPUT, &mut d));
        d.data.as_uint()
    }

    fn set_voltages(dev: &mut Device, pos: f64, neg: f64) {
        let pd2 = dev.find_pin("PD2").unwrap();
        let pd3 = dev.find_pin("PD3").unwrap();
        dev.set_pin_voltage(pd3, neg);
        dev.set_pin_voltage(pd2, pos);
    }

    #[test]
    fn test_compare_pins() {
        let mut dev = device();
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(output(&mut dev), 0);
        dev.write_ioreg(BASE + AC_CTRLA, 0x01);
        assert_eq!(output(&mut dev), 1);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS) & 0x10, 0x10);

        set_voltages(&mut dev, 0.3, 0.4);
        assert_eq!(output(&mut dev), 0);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS) & 0x10, 0x00);

        // inverted
        dev.write_ioreg(BASE + AC_MUXCTRLA, 0x80);
        assert_eq!(output(&mut dev), 1);

        dev.write_ioreg(BASE + AC_CTRLA, 0x00);
        assert_eq!(output(&mut dev), 0);
    }

    #[test]
    fn test_dac_channel() {
        let mut dev = device();
        // AC0REFSEL = 2.5V, DAC at half scale
        dev.write_ioreg(0xA0, 0x02);
        dev.write_ioreg(BASE + AC_DACREF, 0x80);
        let mut d = CtlData::default();
        assert!(dev.ctlreq(CtlId::acp(0), CTLREQ_ACP_GET_DAC, &mut d));
        assert!((d.data.as_double() - 0.25).abs() < 1e-9);

        let pd2 = dev.find_pin("PD2").unwrap();
        dev.set_pin_voltage(pd2, 0.3);
        dev.write_ioreg(BASE + AC_MUXCTRLA, 0x03);
        dev.write_ioreg(BASE + AC_CTRLA, 0x01);
        assert_eq!(output(&mut dev), 1);
        dev.set_pin_voltage(pd2, 0.2);
        assert_eq!(output(&mut dev), 0);
    }

    #[test]
    fn test_reference_change_reevaluates() {
        let mut dev = device();
        // DAC on the negative input: AC0REFSEL 2.5V, DACREF half scale, 0.25 of VCC
        dev.write_ioreg(0xA0, 0x02);
        dev.write_ioreg(BASE + AC_DACREF, 0x80);
        let pd2 = dev.find_pin("PD2").unwrap();
        dev.set_pin_voltage(pd2, 0.3);
        dev.write_ioreg(BASE + AC_MUXCTRLA, 0x03);
        dev.write_ioreg(BASE + AC_INTCTRL, 0x01);
        // falling edges only
        dev.write_ioreg(BASE + AC_CTRLA, 0x21);
        assert_eq!(output(&mut dev), 1);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS), 0x10);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);

        // 4.3V: the DAC moves to 0.43, above the pin
        dev.write_ioreg(0xA0, 0x03);
        assert_eq!(output(&mut dev), 0);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS), 0x01);
        assert_eq!(dev.interrupt_state(IV), VectorState::Raised);

        dev.write_ioreg(BASE + AC_STATUS, 0x01);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);

        // 1.1V: back to 0.11, a rising edge leaves CMP clear
        dev.write_ioreg(0xA0, 0x01);
        assert_eq!(output(&mut dev), 1);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS), 0x10);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);
    }

    #[test]
    fn test_vcc_change_rescales_hysteresis() {
        let mut dev = device();
        // 50 mV is 0.01 of 5V
        dev.write_ioreg(BASE + AC_CTRLA, 0x07);
        set_voltages(&mut dev, 0.504, 0.5);
        assert_eq!(output(&mut dev), 0);

        // 0.005 of 10V, the same inputs now cross the upper threshold
        let mut d = CtlData::new(VarData::Double(10.0), Source::ExtVcc as u32);
        assert!(dev.ctlreq(CtlId::VREF, CTLREQ_VREF_SET, &mut d));
        assert_eq!(output(&mut dev), 1);
        assert_ne!(dev.state(), DeviceState::Crashed);
    }

    #[test]
    fn test_hysteresis() {
        let mut dev = device();
        // 50 mV at 5 V: 0.01 of VCC
        dev.write_ioreg(BASE + AC_CTRLA, 0x07);
        set_voltages(&mut dev, 0.504, 0.5);
        assert_eq!(output(&mut dev), 0);
        set_voltages(&mut dev, 0.506, 0.5);
        assert_eq!(output(&mut dev), 1);
        set_voltages(&mut dev, 0.497, 0.5);
        assert_eq!(output(&mut dev), 1);
        set_voltages(&mut dev, 0.494, 0.5);
        assert_eq!(output(&mut dev), 0);
    }

    #[test]
    fn test_interrupt_modes() {
        let mut dev = device();
        set_voltages(&mut dev, 0.2, 0.4);
        dev.write_ioreg(BASE + AC_INTCTRL, 0x01);
        // rising only
        dev.write_ioreg(BASE + AC_CTRLA, 0x31);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(dev.interrupt_state(IV), VectorState::Raised);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS), 0x11);

        // write one to clear
        dev.write_ioreg(BASE + AC_STATUS, 0x01);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS), 0x10);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);

        set_voltages(&mut dev, 0.2, 0.4);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);

        // falling only
        dev.write_ioreg(BASE + AC_CTRLA, 0x21);
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(dev.interrupt_state(IV), VectorState::Idle);
        set_voltages(&mut dev, 0.2, 0.4);
        assert_eq!(dev.interrupt_state(IV), VectorState::Raised);
    }

    #[test]
    fn test_flag_without_enable() {
        let mut dev = device();
        dev.write_ioreg(BASE + AC_CTRLA, 0x01);
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(dev.read_ioreg(BASE + AC_STATUS) & 0x01, 0x01);
        assert_eq!(dev.pending_interrupt(), None);
        dev.write_ioreg(BASE + AC_INTCTRL, 0x01);
        assert_eq!(dev.pending_interrupt(), Some(IV));
    }

    #[test]
    fn test_sleep_freezes_output() {
        let mut dev = device();
        let mut fw = Firmware::new();
        fw.frequency = 1_000_000;
        fw.vcc = 5.0;
        fw.add_block(MemoryArea::Flash, MemBlock::new(0, vec![0xFF, 0xCF]));
        dev.load_firmware(&fw).unwrap();

        dev.write_ioreg(BASE + AC_CTRLA, 0x01);
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(output(&mut dev), 1);

        dev.sleep(SleepMode::Standby);
        set_voltages(&mut dev, 0.2, 0.4);
        assert_eq!(output(&mut dev), 1);
        dev.wakeup();
        assert_eq!(output(&mut dev), 0);

        // RUNSTDBY keeps it running in standby, not in power-down
        dev.write_ioreg(BASE + AC_CTRLA, 0x81);
        dev.sleep(SleepMode::Standby);
        set_voltages(&mut dev, 0.6, 0.4);
        assert_eq!(output(&mut dev), 1);
        dev.wakeup();
        dev.sleep(SleepMode::PowerDown);
        set_voltages(&mut dev, 0.2, 0.4);
        assert_eq!(output(&mut dev), 1);
        dev.wakeup();
        assert_eq!(output(&mut dev), 0);
    }

    #[test]
    fn test_missing_pin_fails_init() {
        let mut dev = Device::new(DeviceConfig {
            name: "ac".into(),
            pins: vec!["PD2".to_string()],
            io_end: 0x0FFF,
            vector_count: 32,
            flash_size: 0,
            fuse_size: 0,
            eeprom_size: 0,
        });
        dev.attach_peripheral(Box::new(Vref::new(VrefConfig { reg_base: 0xA0 }))).unwrap();
        dev.attach_peripheral(Box::new(AnalogComparator::new(0, config()))).unwrap();
        assert_eq!(dev.init(), Err(SimError::PinNotFound("PD4".to_string())));
        assert_eq!(dev.state(), DeviceState::Limbo);
    }

    #[test]
    fn test_missing_vref_fails_init() {
        let mut dev = Device::new(DeviceConfig {
            name: "ac".into(),
            pins: ["PD2", "PD3", "PD4"].iter().map(|s| s.to_string()).collect(),
            io_end: 0x0FFF,
            vector_count: 32,
            flash_size: 0,
            fuse_size: 0,
            eeprom_size: 0,
        });
        dev.attach_peripheral(Box::new(AnalogComparator::new(0, config()))).unwrap();
        assert_eq!(dev.init(), Err(SimError::PeripheralNotFound(CtlId::VREF)));
    }
}
