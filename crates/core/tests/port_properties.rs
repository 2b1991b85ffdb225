//! Behavioural properties of the 0-series port and of signal propagation,
//! checked through the public device API.

use avrio_core::interrupt::SIG_INT_RAISED;
use avrio_core::peripheral::{Ctx, CtlReq, Peripheral};
use avrio_core::peripherals::{Mega0Port, Mega0PortConfig};
use avrio_core::signal::SignalData;
use avrio_core::{CtlData, CtlId, Device, DeviceConfig, DeviceOptions, DeviceState, PinId, PinState, SimError, SimResult};
use proptest::prelude::*;

const PORTA: u16 = 0x400;
const PORTB: u16 = 0x420;
const VPORTA: u16 = 0x00;

const DIR: u16 = 0x00;
const DIRSET: u16 = 0x01;
const DIRCLR: u16 = 0x02;
const DIRTGL: u16 = 0x03;
const OUT: u16 = 0x04;
const OUTSET: u16 = 0x05;
const OUTCLR: u16 = 0x06;
const OUTTGL: u16 = 0x07;
const IN: u16 = 0x08;
const INTFLAGS: u16 = 0x09;
const PIN0CTRL: u16 = 0x10;

const IV_A: u16 = 1;

/// Ports A and B with `bits_a` pins on port A.
fn device_with(bits_a: u8, extra: Vec<Box<dyn Peripheral>>) -> Device {
    let mut pins: Vec<String> = (0..bits_a).map(|i| format!("PA{}", i)).collect();
    pins.extend((0..8).map(|i| format!("PB{}", i)));
    let mut dev = Device::new(DeviceConfig {
        name: "props".into(),
        pins,
        io_end: 0x0FFF,
        vector_count: 8,
        flash_size: 0,
        fuse_size: 0,
        eeprom_size: 0,
    });
    let a = Mega0PortConfig { reg_base_port: PORTA, reg_base_vport: VPORTA, iv_port: IV_A };
    let b = Mega0PortConfig { reg_base_port: PORTB, reg_base_vport: 0x04, iv_port: 2 };
    dev.attach_peripheral(Box::new(Mega0Port::new('A', a))).unwrap();
    dev.attach_peripheral(Box::new(Mega0Port::new('B', b))).unwrap();
    for p in extra {
        dev.attach_peripheral(p).unwrap();
    }
    dev.init().unwrap();
    dev
}

fn device() -> Device {
    device_with(8, Vec::new())
}

fn pin_states(dev: &Device, port: char) -> Vec<Option<PinState>> {
    (0..8)
        .map(|i| dev.find_pin(&format!("P{}{}", port, i)).and_then(|id| dev.pin_state(id)))
        .collect()
}

const CTLREQ_MIRROR_ARM: CtlReq = 1;

/// Copies the value of one port onto the board side of another port's pins.
/// An inverting mirror stays idle until armed.
struct Mirror {
    id: CtlId,
    from: char,
    to: char,
    invert: bool,
    armed: bool,
    pins: Vec<PinId>,
}

impl Mirror {
    fn new(tag: u8, from: char, to: char, invert: bool) -> Box<dyn Peripheral> {
        Box::new(Mirror {
            id: CtlId::from_chars([b'M', b'I', b'R', tag]),
            from,
            to,
            invert,
            armed: !invert,
            pins: Vec::new(),
        })
    }
}

impl Peripheral for Mirror {
    fn ctl_id(&self) -> CtlId {
        self.id
    }

    fn init(&mut self, ctx: &mut Ctx<'_>) -> SimResult<()> {
        let port = CtlId::port(self.from);
        let sig = ctx.get_signal(port, 0).ok_or(SimError::PeripheralNotFound(port))?;
        ctx.connect(sig, 0);
        self.pins = (0..8).filter_map(|i| ctx.find_pin(&format!("P{}{}", self.to, i))).collect();
        Ok(())
    }

    fn ctlreq(&mut self, _ctx: &mut Ctx<'_>, req: CtlReq, _data: &mut CtlData) -> bool {
        self.armed |= req == CTLREQ_MIRROR_ARM;
        req == CTLREQ_MIRROR_ARM
    }

    fn raised(&mut self, ctx: &mut Ctx<'_>, sigdata: &SignalData, _tag: u32) {
        if !self.armed {
            return;
        }
        let v = sigdata.data.as_uint();
        for (i, &id) in self.pins.iter().enumerate() {
            let high = ((v >> i) & 1 != 0) != self.invert;
            ctx.set_pin_external_state(id, if high { PinState::High } else { PinState::Low }, 0.0);
        }
    }
}

proptest! {
    #[test]
    fn set_clear_toggle_laws(init in any::<u8>(), v in any::<u8>()) {
        let mut dev = device();
        for (reg, set, clr, tgl) in [(DIR, DIRSET, DIRCLR, DIRTGL), (OUT, OUTSET, OUTCLR, OUTTGL)] {
            dev.write_ioreg(PORTA + reg, init);
            dev.write_ioreg(PORTA + set, v);
            prop_assert_eq!(dev.read_ioreg(PORTA + reg), init | v);
            prop_assert_eq!(dev.read_ioreg(PORTA + set), 0);

            dev.write_ioreg(PORTA + reg, init);
            dev.write_ioreg(PORTA + clr, v);
            prop_assert_eq!(dev.read_ioreg(PORTA + reg), init & !v);
            prop_assert_eq!(dev.read_ioreg(PORTA + clr), 0);

            dev.write_ioreg(PORTA + reg, init);
            dev.write_ioreg(PORTA + tgl, v);
            prop_assert_eq!(dev.read_ioreg(PORTA + reg), init ^ v);
            prop_assert_eq!(dev.read_ioreg(PORTA + tgl), 0);
        }
    }

    #[test]
    fn driven_port_reads_back_its_output(out in any::<u8>(), bits in 1u8..=8) {
        let mask = ((1u16 << bits) - 1) as u8;
        let mut dev = device_with(bits, Vec::new());
        dev.write_ioreg(PORTA + DIR, 0xFF);
        dev.write_ioreg(PORTA + OUT, out);
        prop_assert_eq!(dev.read_ioreg(PORTA + OUT), out & mask);
        prop_assert_eq!(dev.read_ioreg(PORTA + IN), out & mask);
    }

    #[test]
    fn vport_matches_port(ops in proptest::collection::vec((any::<bool>(), any::<u8>()), 1..12)) {
        let mut direct = device();
        let mut mirrored = device();
        for &(is_dir, v) in &ops {
            let (p, vp) = if is_dir { (DIR, 0x00) } else { (OUT, 0x01) };
            direct.write_ioreg(PORTA + p, v);
            mirrored.write_ioreg(VPORTA + vp, v);
        }
        for reg in [DIR, OUT, IN, INTFLAGS] {
            prop_assert_eq!(direct.read_ioreg(PORTA + reg), mirrored.read_ioreg(PORTA + reg));
        }
        prop_assert_eq!(mirrored.read_ioreg(VPORTA + 0x02), direct.read_ioreg(PORTA + IN));
        prop_assert_eq!(pin_states(&direct, 'A'), pin_states(&mirrored, 'A'));
    }

    #[test]
    fn intflags_write_one_to_clear(levels in any::<u8>(), w in any::<u8>()) {
        let mut dev = device();
        // floating pins read 0, so level sensing flags immediately
        for i in 0..8 {
            if (levels >> i) & 1 != 0 {
                dev.write_ioreg(PORTA + PIN0CTRL + i, 0x05);
            }
        }
        prop_assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), levels);
        prop_assert_eq!(dev.pending_interrupt().is_some(), levels != 0);

        dev.write_ioreg(PORTA + INTFLAGS, w);
        let left = levels & !w;
        prop_assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), left);
        prop_assert_eq!(dev.pending_interrupt().is_some(), left != 0);
    }
}

#[test]
fn masked_port_ignores_missing_pins() {
    let mut dev = device_with(4, Vec::new());
    dev.write_ioreg(PORTA + DIR, 0xFF);
    dev.write_ioreg(PORTA + OUT, 0xA5);
    assert_eq!(dev.read_ioreg(PORTA + IN), 0x05);
    assert_eq!(dev.read_ioreg(PORTA + OUT), 0x05);
}

#[test]
fn level_sense_raises_on_config_write() {
    let mut dev = device();
    assert_eq!(dev.pending_interrupt(), None);
    dev.write_ioreg(PORTA + PIN0CTRL + 2, 0x05);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x04);
    assert_eq!(dev.pending_interrupt(), Some(IV_A));
}

#[test]
fn level_flag_cleared_while_low_waits_for_next_fall() {
    let mut dev = device();
    let pa2 = dev.find_pin("PA2").unwrap();
    dev.set_pin_external_state(pa2, PinState::Low);
    dev.write_ioreg(PORTA + PIN0CTRL + 2, 0x05);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x04);
    assert_eq!(dev.pending_interrupt(), Some(IV_A));

    dev.write_ioreg(PORTA + INTFLAGS, 0x04);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x00);
    assert_eq!(dev.pending_interrupt(), None);

    // still low: no re-assertion until the pin changes again
    dev.set_pin_external_state(pa2, PinState::Low);
    dev.write_ioreg(PORTA + OUT, 0x00);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x00);
    assert_eq!(dev.pending_interrupt(), None);

    dev.set_pin_external_state(pa2, PinState::High);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x00);
    dev.set_pin_external_state(pa2, PinState::Low);
    assert_eq!(dev.read_ioreg(PORTA + INTFLAGS), 0x04);
    assert_eq!(dev.pending_interrupt(), Some(IV_A));
}

#[test]
fn raise_is_idempotent() {
    let mut dev = device();
    let sig = dev.get_signal(CtlId::INTC, 0).unwrap();
    let probe = dev.add_probe(sig);
    dev.write_ioreg(PORTA + PIN0CTRL, 0x05);
    dev.write_ioreg(PORTA + PIN0CTRL + 1, 0x05);
    dev.write_ioreg(PORTA + PIN0CTRL, 0x05);
    let raised = dev.probe(probe).unwrap().history().iter().filter(|d| d.sigid == SIG_INT_RAISED).count();
    assert_eq!(raised, 1);
}

#[test]
fn cross_mirrored_ports_settle() {
    let mut dev = device_with(8, vec![Mirror::new(b'A', 'A', 'B', false), Mirror::new(b'B', 'B', 'A', false)]);
    let pa0 = dev.find_pin("PA0").unwrap();
    dev.set_pin_external_state(pa0, PinState::High);
    assert_ne!(dev.state(), DeviceState::Crashed);
    assert!(dev.last_propagation_steps() < 1000);
    assert_eq!(dev.read_ioreg(PORTB + IN), 0x01);

    dev.set_pin_external_state(pa0, PinState::Low);
    assert!(dev.last_propagation_steps() < 1000);
    assert_eq!(dev.read_ioreg(PORTB + IN), 0x00);
    assert_eq!(dev.state(), DeviceState::Ready);
}

#[test]
fn inverting_loop_crashes_device() {
    let mut dev = device_with(8, vec![Mirror::new(b'A', 'A', 'A', true)]);
    dev.set_options(DeviceOptions { max_propagation_steps: 500, ..DeviceOptions::default() });
    assert!(dev.ctlreq(CtlId::from_chars(*b"MIRA"), CTLREQ_MIRROR_ARM, &mut CtlData::default()));
    assert_eq!(dev.state(), DeviceState::Ready);
    let pa0 = dev.find_pin("PA0").unwrap();
    dev.set_pin_external_state(pa0, PinState::High);
    assert_eq!(dev.state(), DeviceState::Crashed);
    assert_eq!(dev.last_propagation_steps(), 501);
}
