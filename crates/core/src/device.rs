//! Device: owns the bus context and the attached peripherals.
//!
//! Every public operation that can cause signal traffic (register access,
//! external pin stimulus, control request, reset, sleep) delivers its
//! notifications synchronously and then handles the core requests posted
//! meanwhile, so callers always observe a settled device.
//!
//! ## Lifecycle
//!
//! ```text
//!   Limbo ──init──▶ Ready ──load_firmware──▶ Running ◀──▶ Sleeping / Halted
//!                                              │
//!                             Reset / Stopped / Crashed / Done
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, CoreRequest, Wire, CRASH_INVALID_CONFIG};
use crate::error::{SimError, SimResult};
use crate::firmware::{Firmware, MemoryArea};
use crate::interrupt::{VectorState, SIG_INT_ACKNOWLEDGED, SIG_INT_RETURNED};
use crate::ioreg::IoRegWrite;
use crate::memory::NonVolatileMemory;
use crate::peripheral::{self, Ctx, CtlData, CtlReq, Peripheral, PeripheralId, PeripheralSlot, SleepMode, CTLREQ_GET_SIGNAL};
use crate::peripherals::console::{Console, CTLREQ_CONSOLE_SET_REGISTER};
use crate::peripherals::vref::{Source, CTLREQ_VREF_SET};
use crate::pin::{Pin, PinId, PinState};
use crate::signal::{HookId, SignalId, SignalProbe};
use crate::snapshot::{DeviceSnapshot, PinSnapshot};
use crate::types::{CtlId, IntVect, RegAddr, VarData};

// Reset flags
pub const RESET_POWERON: u8 = 0x01;
pub const RESET_EXTERNAL: u8 = 0x02;
pub const RESET_BOD: u8 = 0x04;
pub const RESET_WATCHDOG: u8 = 0x08;
pub const RESET_SOFTWARE: u8 = 0x10;

/// Default bound on notifications delivered by one operation.
pub const MAX_PROPAGATION_STEPS: usize = 100_000;

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Pin names, `P<letter><bit>` for port pins.
    pub pins: Vec<String>,
    /// Last address of the I/O register space.
    pub io_end: RegAddr,
    /// Number of interrupt vectors, reset vector included.
    pub vector_count: usize,
    pub flash_size: usize,
    pub fuse_size: usize,
    pub eeprom_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceState {
    Limbo,
    Ready,
    Running,
    Sleeping,
    Halted,
    Reset,
    Done,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Reset with the BOD flag instead of stopping when a pin is shorted.
    pub reset_on_pin_shorting: bool,
    pub max_propagation_steps: usize,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        DeviceOptions { reset_on_pin_shorting: false, max_propagation_steps: MAX_PROPAGATION_STEPS }
    }
}

pub struct Device {
    config: DeviceConfig,
    options: DeviceOptions,
    bus: Bus,
    peripherals: Vec<PeripheralSlot>,
    state: DeviceState,
    sleep_mode: SleepMode,
    pending_reset_flags: u8,
    reset_flags: u8,
    frequency: u32,
    flash: NonVolatileMemory,
    fuses: NonVolatileMemory,
    eeprom: NonVolatileMemory,
    console_output: Vec<String>,
    last_propagation_steps: usize,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Self {
        let pin_names: Vec<&str> = config.pins.iter().map(String::as_str).collect();
        let mut bus = Bus::new(&config.name, &pin_names, config.io_end, config.vector_count);
        bus.set_max_steps(MAX_PROPAGATION_STEPS);
        let mut dev = Device {
            options: DeviceOptions::default(),
            bus,
            peripherals: Vec::new(),
            state: DeviceState::Limbo,
            sleep_mode: SleepMode::Active,
            pending_reset_flags: RESET_POWERON,
            reset_flags: 0,
            frequency: 0,
            flash: NonVolatileMemory::new(config.flash_size),
            fuses: NonVolatileMemory::new(config.fuse_size),
            eeprom: NonVolatileMemory::new(config.eeprom_size),
            console_output: Vec::new(),
            last_propagation_steps: 0,
            config,
        };
        dev.peripherals.push(Some(Box::new(Console::new())));
        dev
    }

    // --- Accessors ---

    pub fn name(&self) -> &str { &self.config.name }
    pub fn config(&self) -> &DeviceConfig { &self.config }
    pub fn state(&self) -> DeviceState { self.state }
    pub fn sleep_mode(&self) -> SleepMode { self.sleep_mode }
    /// Flags of the last reset.
    pub fn reset_flags(&self) -> u8 { self.reset_flags }
    pub fn frequency(&self) -> u32 { self.frequency }
    pub fn options(&self) -> DeviceOptions { self.options }
    pub fn set_options(&mut self, options: DeviceOptions) {
        self.options = options;
        self.bus.set_max_steps(options.max_propagation_steps);
    }
    pub fn bus(&self) -> &Bus { &self.bus }
    pub fn flash(&self) -> &NonVolatileMemory { &self.flash }
    pub fn fuses(&self) -> &NonVolatileMemory { &self.fuses }
    pub fn eeprom(&self) -> &NonVolatileMemory { &self.eeprom }

    /// Notifications delivered by the last top-level operation.
    pub fn last_propagation_steps(&self) -> usize {
        self.last_propagation_steps
    }

    // --- Peripherals ---

    /// Attach a peripheral. Only possible before `init`.
    pub fn attach_peripheral(&mut self, per: Box<dyn Peripheral>) -> SimResult<PeripheralId> {
        if self.state != DeviceState::Limbo {
            return Err(SimError::InvalidState(self.state));
        }
        debug!(device = %self.config.name, peripheral = %per.ctl_id(), "attaching peripheral");
        self.peripherals.push(Some(per));
        Ok(PeripheralId(self.peripherals.len() - 1))
    }

    /// Detach a peripheral, dropping its subscriptions, register claims and vectors.
    pub fn detach_peripheral(&mut self, id: CtlId) -> Option<Box<dyn Peripheral>> {
        let pid = self.find_peripheral(id)?;
        let per = self.peripherals[pid.0].take()?;
        for v in 0..self.bus.intc.vector_count() as IntVect {
            if self.bus.intc.owner(v) == Some(pid) {
                self.bus.cancel_interrupt(v);
            }
        }
        self.bus.signals.disconnect_all(HookId::Peripheral(pid));
        self.bus.regs.release(pid);
        self.bus.intc.unregister_owner(pid);
        debug!(device = %self.config.name, peripheral = %id, "peripheral detached");
        self.propagate();
        Some(per)
    }

    pub fn find_peripheral(&self, id: CtlId) -> Option<PeripheralId> {
        self.peripherals
            .iter()
            .position(|p| p.as_ref().map_or(false, |p| p.ctl_id() == id))
            .map(PeripheralId)
    }

    pub fn peripheral_ids(&self) -> Vec<CtlId> {
        self.peripherals.iter().flatten().map(|p| p.ctl_id()).collect()
    }

    /// Run `f` on a peripheral taken out of its slot, with a context on the rest.
    fn with_peripheral<R>(
        &mut self,
        pid: PeripheralId,
        f: impl FnOnce(&mut dyn Peripheral, &mut Ctx<'_>) -> R,
    ) -> Option<R> {
        peripheral::run_on(&mut self.bus, &mut self.peripherals, pid, f)
    }

    /// Deliver what the device raised on the bus itself.
    fn deliver(&mut self) {
        peripheral::deliver_since(&mut self.bus, &mut self.peripherals, 0);
    }

    // --- Lifecycle ---

    pub fn init(&mut self) -> SimResult<()> {
        if self.state != DeviceState::Limbo {
            return Err(SimError::InvalidState(self.state));
        }
        debug!(device = %self.config.name, "initialisation");
        for i in 0..self.peripherals.len() {
            let pid = PeripheralId(i);
            let res = self.with_peripheral(pid, |p, ctx| {
                debug!(device = %ctx.name(), peripheral = %p.ctl_id(), "initialising peripheral");
                p.init(ctx).map_err(|e| (p.ctl_id(), e))
            });
            if let Some(Err((id, e))) = res {
                error!(device = %self.config.name, peripheral = %id, error = %e, "peripheral initialisation failed");
                self.bus.signals.clear_pending();
                return Err(e);
            }
        }
        self.state = DeviceState::Ready;
        self.reset(RESET_POWERON);
        debug!(device = %self.config.name, "initialisation complete");
        Ok(())
    }

    pub fn reset(&mut self, flags: u8) {
        self.pending_reset_flags |= flags;
        self.do_reset();
        self.propagate();
    }

    fn do_reset(&mut self) {
        debug!(device = %self.config.name, flags = self.pending_reset_flags, "device reset");
        self.reset_flags = self.pending_reset_flags;
        self.pending_reset_flags = 0;

        self.bus.regs.reset();
        self.bus.intc.reset();
        for i in 0..self.peripherals.len() {
            self.with_peripheral(PeripheralId(i), |p, ctx| p.reset(ctx));
        }

        if self.state > DeviceState::Running {
            self.state = DeviceState::Running;
        }
        self.sleep_mode = SleepMode::Active;
    }

    /// Program the firmware and apply its run parameters. Requires `Ready`.
    pub fn load_firmware(&mut self, fw: &Firmware) -> SimResult<()> {
        if self.state != DeviceState::Ready {
            error!(device = %self.config.name, state = ?self.state, "firmware load: device not ready");
            return Err(SimError::InvalidState(self.state));
        }

        self.program(fw)?;

        if fw.frequency == 0 {
            error!(device = %self.config.name, "firmware load: MCU frequency not defined");
            return Err(SimError::NoFrequency);
        }
        self.frequency = fw.frequency;

        if fw.vcc > 0.0 {
            let mut d = CtlData::new(VarData::Double(fw.vcc), Source::ExtVcc as u32);
            if self.ctlreq(CtlId::VREF, CTLREQ_VREF_SET, &mut d) {
                let mut d = CtlData::new(VarData::Double(fw.aref), Source::ExtAref as u32);
                self.ctlreq(CtlId::VREF, CTLREQ_VREF_SET, &mut d);
            } else {
                error!(device = %self.config.name, "firmware load: unable to set VCC, analog features are unusable");
            }
        } else {
            debug!(device = %self.config.name, "firmware load: VCC not defined, analog features are unusable");
        }

        if let Some(reg) = fw.console_register {
            let mut d = CtlData::new(VarData::Uint(reg as u32), 0);
            self.ctlreq(CtlId::CONSOLE, CTLREQ_CONSOLE_SET_REGISTER, &mut d);
        }

        self.state = DeviceState::Running;
        Ok(())
    }

    /// Program the NVM areas. Flash is required, fuses and EEPROM are optional.
    pub fn program(&mut self, fw: &Firmware) -> SimResult<()> {
        if !fw.has_memory(MemoryArea::Flash) {
            error!(device = %self.config.name, "firmware load: no program to load");
            return Err(SimError::NoProgram);
        }
        if !fw.load_memory(MemoryArea::Flash, &mut self.flash) {
            error!(device = %self.config.name, "firmware load: the flash does not fit");
            return Err(SimError::ProgramFailed(MemoryArea::Flash));
        }
        debug!(device = %self.config.name, bytes = fw.memory_size(MemoryArea::Flash), "flash loaded");

        for (area, nvm) in [(MemoryArea::Fuses, &mut self.fuses), (MemoryArea::Eeprom, &mut self.eeprom)] {
            if fw.has_memory(area) {
                if !fw.load_memory(area, nvm) {
                    error!(device = %self.config.name, %area, "firmware load: error programming");
                    return Err(SimError::ProgramFailed(area));
                }
                debug!(device = %self.config.name, %area, "loaded");
            }
        }
        Ok(())
    }

    pub fn crash(&mut self, reason: u16, text: &str) {
        error!(device = %self.config.name, reason, "MCU crash: {}", text);
        self.state = DeviceState::Crashed;
    }

    // --- CPU-side register access ---

    pub fn read_ioreg(&mut self, addr: RegAddr) -> u8 {
        if let Some(pid) = self.bus.regs.owner(addr) {
            self.with_peripheral(pid, |p, ctx| p.ioreg_read_handler(ctx, addr));
            self.propagate();
        }
        self.bus.regs.cpu_read(addr)
    }

    pub fn write_ioreg(&mut self, addr: RegAddr, value: u8) {
        if let Some((pid, data)) = self.bus.regs.cpu_write(addr, value) {
            self.dispatch_write(pid, addr, data);
        }
        self.propagate();
    }

    fn dispatch_write(&mut self, pid: PeripheralId, addr: RegAddr, data: IoRegWrite) {
        self.with_peripheral(pid, |p, ctx| p.ioreg_write_handler(ctx, addr, data));
    }

    // --- Pins ---

    pub fn find_pin(&self, name: &str) -> Option<PinId> {
        self.bus.find_pin(name)
    }

    pub fn pin(&self, id: PinId) -> Option<&Pin> {
        self.bus.pin(id)
    }

    pub fn pin_state(&self, id: PinId) -> Option<PinState> {
        self.bus.pin_state(id)
    }

    pub fn pin_signal(&self, id: PinId) -> Option<SignalId> {
        self.bus.pin_signal(id)
    }

    /// Drive a pin from the board side.
    pub fn set_pin_external_state(&mut self, id: PinId, state: PinState) {
        let v = self.bus.pin(id).map_or(0.0, |p| p.external_voltage());
        self.bus.set_pin_external_state(id, state, v);
        self.deliver();
        self.propagate();
    }

    /// Apply an analog voltage (ratio of VCC) to a pin from the board side.
    pub fn set_pin_voltage(&mut self, id: PinId, voltage: f64) {
        self.bus.set_pin_external_state(id, PinState::Analog, voltage);
        self.deliver();
        self.propagate();
    }

    /// Wire the MCU-side drive of `from` to the board side of `to`.
    pub fn connect_pins(&mut self, from: PinId, to: PinId) -> SimResult<()> {
        let src = self.bus.pin(from).ok_or_else(|| SimError::PinNotFound(format!("{:?}", from)))?;
        let (sig, drive, v) = (src.signal(), src.internal_state(), src.voltage());
        if self.bus.pin(to).is_none() {
            return Err(SimError::PinNotFound(format!("{:?}", to)));
        }
        self.bus.wires.push(Wire { from, to });
        let hook = HookId::Wire(self.bus.wires.len() - 1);
        self.bus.signals.connect(sig, hook, 0);
        self.bus.set_pin_external_state(to, drive, v);
        self.deliver();
        self.propagate();
        Ok(())
    }

    // --- Signals ---

    /// Record every raise of `sig`. Returns the probe index.
    pub fn add_probe(&mut self, sig: SignalId) -> usize {
        self.bus.probes.push(SignalProbe::new(sig));
        let i = self.bus.probes.len() - 1;
        self.bus.signals.connect(sig, HookId::Probe(i), 0);
        i
    }

    pub fn probe(&self, i: usize) -> Option<&SignalProbe> {
        self.bus.probes.get(i)
    }

    pub fn probe_mut(&mut self, i: usize) -> Option<&mut SignalProbe> {
        self.bus.probes.get_mut(i)
    }

    /// Stop recording. The probe keeps its history.
    pub fn remove_probe(&mut self, i: usize) {
        self.bus.signals.disconnect_all(HookId::Probe(i));
    }

    pub fn ctlreq(&mut self, target: CtlId, req: CtlReq, data: &mut CtlData) -> bool {
        if target == CtlId::INTC {
            if req == CTLREQ_GET_SIGNAL {
                data.data = VarData::Signal(self.bus.intc.signal());
                return true;
            }
            return false;
        }
        let Some(pid) = self.find_peripheral(target) else {
            warn!(device = %self.config.name, peripheral = %target, "request to missing peripheral");
            return false;
        };
        let ok = self
            .with_peripheral(pid, |p, ctx| p.ctlreq(ctx, req, data))
            .unwrap_or(false);
        self.propagate();
        ok
    }

    pub fn get_signal(&mut self, target: CtlId, index: u32) -> Option<SignalId> {
        let mut d = CtlData::new(VarData::Invalid, index);
        if self.ctlreq(target, CTLREQ_GET_SIGNAL, &mut d) {
            d.data.as_signal()
        } else {
            None
        }
    }

    // --- Sleep ---

    pub fn sleep(&mut self, mode: SleepMode) {
        if self.state != DeviceState::Running {
            return;
        }
        debug!(device = %self.config.name, ?mode, "going to sleep");
        self.state = DeviceState::Sleeping;
        self.sleep_mode = mode;
        for i in 0..self.peripherals.len() {
            self.with_peripheral(PeripheralId(i), |p, ctx| p.sleep(ctx, true, mode));
        }
        self.propagate();
    }

    pub fn wakeup(&mut self) {
        if self.state != DeviceState::Sleeping {
            return;
        }
        debug!(device = %self.config.name, "waking up");
        let mode = self.sleep_mode;
        for i in 0..self.peripherals.len() {
            self.with_peripheral(PeripheralId(i), |p, ctx| p.sleep(ctx, false, mode));
        }
        self.state = DeviceState::Running;
        self.sleep_mode = SleepMode::Active;
        self.propagate();
    }

    // --- Interrupts (CPU side) ---

    pub fn pending_interrupt(&self) -> Option<IntVect> {
        self.bus.intc.next_irq()
    }

    pub fn interrupt_state(&self, vector: IntVect) -> VectorState {
        self.bus.intc.state(vector)
    }

    /// Acknowledge a raised vector and notify its owner.
    pub fn ack_interrupt(&mut self, vector: IntVect) -> bool {
        let Some(owner) = self.bus.intc.ack(vector) else { return false };
        let sig = self.bus.intc.signal();
        self.bus.signals.raise_u(sig, SIG_INT_ACKNOWLEDGED, vector as u32, 0);
        self.deliver();
        self.with_peripheral(owner, |p, ctx| p.interrupt_ack_handler(ctx, vector));
        self.propagate();
        true
    }

    /// Return from an interrupt routine.
    pub fn reti(&mut self, vector: IntVect) {
        let sig = self.bus.intc.signal();
        self.bus.signals.raise_u(sig, SIG_INT_RETURNED, vector as u32, 0);
        self.deliver();
        self.propagate();
    }

    // --- Console ---

    pub fn take_console_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console_output)
    }

    // --- Propagation ---

    /// Handle the core requests posted by the operation, then close its
    /// delivery accounting. A runaway delivery chain crashes the device.
    fn propagate(&mut self) {
        loop {
            self.deliver();
            if self.bus.runaway() {
                error!(device = %self.config.name, steps = self.bus.steps(), "signal propagation does not settle");
                self.bus.signals.clear_pending();
                self.bus.clear_requests();
                self.crash(CRASH_INVALID_CONFIG, "runaway signal propagation");
                break;
            }
            if let Some(req) = self.bus.next_request() {
                self.handle_request(req);
            } else if self.state == DeviceState::Reset {
                self.do_reset();
            } else {
                break;
            }
        }
        self.last_propagation_steps = self.bus.finish_propagation();
    }

    fn handle_request(&mut self, req: CoreRequest) {
        match req {
            CoreRequest::PinShorted(pin) => {
                let name = self.bus.pin(pin).map(|p| p.name().to_string()).unwrap_or_default();
                error!(device = %self.config.name, pin = %name, "pin shorted");
                if self.options.reset_on_pin_shorting {
                    self.pending_reset_flags |= RESET_BOD;
                    self.state = DeviceState::Reset;
                } else {
                    self.state = DeviceState::Stopped;
                }
            }
            CoreRequest::Crash { reason, text } => self.crash(reason, &text),
            CoreRequest::Reset(flags) => {
                self.pending_reset_flags |= flags;
                warn!(device = %self.config.name, flags = self.pending_reset_flags, "MCU reset triggered");
                self.state = DeviceState::Reset;
            }
            CoreRequest::ConsoleLine(line) => {
                info!(device = %self.config.name, "console: {}", line);
                self.console_output.push(line);
            }
            CoreRequest::Halt(on) => {
                if on && self.state == DeviceState::Running {
                    debug!(device = %self.config.name, "device halted");
                    self.state = DeviceState::Halted;
                } else if !on && self.state == DeviceState::Halted {
                    debug!(device = %self.config.name, "device resuming from halt");
                    self.state = DeviceState::Running;
                }
            }
        }
    }

    // --- Snapshots ---

    pub fn snapshot(&self) -> SimResult<DeviceSnapshot> {
        let mut peripherals = Vec::with_capacity(self.peripherals.len());
        for slot in &self.peripherals {
            peripherals.push(match slot {
                Some(p) => Some(p.save_state()?),
                None => None,
            });
        }
        Ok(DeviceSnapshot {
            device: self.config.name.clone(),
            state: self.state,
            sleep_mode: self.sleep_mode,
            reset_flags: self.reset_flags,
            registers: self.bus.regs.values(),
            pins: self
                .bus
                .pins
                .iter()
                .map(|p| PinSnapshot {
                    name: p.name().to_string(),
                    internal: p.internal_state(),
                    external: p.external_state(),
                    external_voltage: p.external_voltage(),
                })
                .collect(),
            interrupts: self.bus.intc.states(),
            eeprom: self.eeprom.clone(),
            peripherals,
        })
    }

    /// Restore a snapshot taken from a device with the same configuration.
    /// No signal is raised by the restore itself.
    pub fn restore(&mut self, snap: &DeviceSnapshot) -> SimResult<()> {
        if snap.device != self.config.name || snap.peripherals.len() != self.peripherals.len() {
            return Err(SimError::Snapshot(format!(
                "snapshot of '{}' does not match device '{}'",
                snap.device, self.config.name
            )));
        }
        self.bus.signals.clear_pending();
        self.bus.clear_requests();

        self.bus.regs.load_values(&snap.registers);
        for ps in &snap.pins {
            let Some(id) = self.bus.find_pin(&ps.name) else { continue };
            if let Some(pin) = self.bus.pins.get_mut(id) {
                pin.set_internal(ps.internal);
                pin.set_external(ps.external, ps.external_voltage);
                pin.update();
            }
        }
        self.bus.intc.load_states(&snap.interrupts);
        self.eeprom = snap.eeprom.clone();

        for (i, st) in snap.peripherals.iter().enumerate() {
            let Some(bytes) = st else { continue };
            if let Some(r) = self.with_peripheral(PeripheralId(i), |p, ctx| p.load_state(ctx, bytes)) {
                r?;
            }
        }
        self.bus.signals.clear_pending();
        self.bus.finish_propagation();

        self.state = snap.state;
        self.sleep_mode = snap.sleep_mode;
        self.reset_flags = snap.reset_flags;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::MemBlock;
    use crate::peripherals::{Mega0Port, Mega0PortConfig};

    fn config() -> DeviceConfig {
        DeviceConfig {
            name: "test".into(),
            pins: (0..8).map(|i| format!("PA{}", i)).collect(),
            io_end: 0x0FFF,
            vector_count: 8,
            flash_size: 64,
            fuse_size: 4,
            eeprom_size: 16,
        }
    }

    fn port_device() -> Device {
        let mut dev = Device::new(config());
        let cfg = Mega0PortConfig { reg_base_port: 0x400, reg_base_vport: 0x00, iv_port: 3 };
        dev.attach_peripheral(Box::new(Mega0Port::new('A', cfg))).unwrap();
        dev.init().unwrap();
        dev
    }

    fn firmware() -> Firmware {
        let mut fw = Firmware::new();
        fw.frequency = 20_000_000;
        fw.add_block(MemoryArea::Flash, MemBlock::new(0, vec![0x0C, 0x94]));
        fw
    }

    #[test]
    fn test_lifecycle() {
        let mut dev = Device::new(config());
        assert_eq!(dev.state(), DeviceState::Limbo);
        dev.init().unwrap();
        assert_eq!(dev.state(), DeviceState::Ready);
        assert_eq!(dev.reset_flags(), RESET_POWERON);
        assert_eq!(dev.init(), Err(SimError::InvalidState(DeviceState::Ready)));
        assert!(dev.attach_peripheral(Box::new(Console::new())).is_err());

        dev.load_firmware(&firmware()).unwrap();
        assert_eq!(dev.state(), DeviceState::Running);
        assert_eq!(dev.frequency(), 20_000_000);
        assert_eq!(dev.flash().read(1), 0x94);
        assert_eq!(
            dev.load_firmware(&firmware()),
            Err(SimError::InvalidState(DeviceState::Running))
        );
    }

    #[test]
    fn test_load_firmware_errors() {
        let mut dev = Device::new(config());
        dev.init().unwrap();
        assert_eq!(dev.load_firmware(&Firmware::new()), Err(SimError::NoProgram));

        let mut fw = firmware();
        fw.frequency = 0;
        assert_eq!(dev.load_firmware(&fw), Err(SimError::NoFrequency));

        let mut fw = firmware();
        fw.add_block(MemoryArea::Flash, MemBlock::new(60, vec![0; 8]));
        assert_eq!(dev.load_firmware(&fw), Err(SimError::ProgramFailed(MemoryArea::Flash)));
        assert_eq!(dev.state(), DeviceState::Ready);
    }

    #[test]
    fn test_init_failure_register_collision() {
        let mut dev = Device::new(config());
        let cfg = Mega0PortConfig { reg_base_port: 0x400, reg_base_vport: 0x00, iv_port: 3 };
        let cfg2 = Mega0PortConfig { reg_base_port: 0x404, reg_base_vport: 0x04, iv_port: 4 };
        dev.attach_peripheral(Box::new(Mega0Port::new('A', cfg))).unwrap();
        dev.attach_peripheral(Box::new(Mega0Port::new('B', cfg2))).unwrap();
        assert!(matches!(dev.init(), Err(SimError::RegisterCollision { addr: 0x404, .. })));
        assert_eq!(dev.state(), DeviceState::Limbo);
    }

    #[test]
    fn test_console_lines() {
        let mut dev = Device::new(config());
        dev.init().unwrap();
        let mut fw = firmware();
        fw.console_register = Some(0x0F00);
        dev.load_firmware(&fw).unwrap();
        for b in b"hi\nyo" {
            dev.write_ioreg(0x0F00, *b);
        }
        assert_eq!(dev.take_console_output(), vec!["hi".to_string()]);
        dev.write_ioreg(0x0F00, b'\n');
        assert_eq!(dev.take_console_output(), vec!["yo".to_string()]);
    }

    #[test]
    fn test_pin_shorting_stops_or_resets() {
        let mut dev = port_device();
        dev.load_firmware(&firmware()).unwrap();
        let pa0 = dev.find_pin("PA0").unwrap();
        dev.write_ioreg(0x400, 0x01); // DIR
        dev.write_ioreg(0x404, 0x01); // OUT
        dev.set_pin_external_state(pa0, PinState::Low);
        assert_eq!(dev.pin_state(pa0), Some(PinState::Shorted));
        assert_eq!(dev.state(), DeviceState::Stopped);

        let mut dev = port_device();
        dev.set_options(DeviceOptions { reset_on_pin_shorting: true, ..DeviceOptions::default() });
        dev.load_firmware(&firmware()).unwrap();
        dev.write_ioreg(0x400, 0x01);
        dev.write_ioreg(0x404, 0x01);
        dev.set_pin_external_state(pa0, PinState::Low);
        // reset released the pin, the external drive wins
        assert_eq!(dev.state(), DeviceState::Running);
        assert_eq!(dev.reset_flags() & RESET_BOD, RESET_BOD);
        assert_eq!(dev.read_ioreg(0x400), 0);
        assert_eq!(dev.pin_state(pa0), Some(PinState::Low));
    }

    #[test]
    fn test_wire_forwards_drive() {
        let mut dev = port_device();
        let pa0 = dev.find_pin("PA0").unwrap();
        let pa1 = dev.find_pin("PA1").unwrap();
        dev.connect_pins(pa0, pa1).unwrap();
        dev.write_ioreg(0x400, 0x01);
        dev.write_ioreg(0x404, 0x01);
        assert_eq!(dev.pin_state(pa1), Some(PinState::High));
        assert_eq!(dev.read_ioreg(0x408), 0x03);
        dev.write_ioreg(0x406, 0x01); // OUTCLR
        assert_eq!(dev.pin_state(pa1), Some(PinState::Low));
        assert_eq!(dev.read_ioreg(0x408), 0x00);
    }

    #[test]
    fn test_detach_peripheral_releases_everything() {
        let mut dev = port_device();
        dev.write_ioreg(0x410, 0x05); // PIN0CTRL level sense, PA0 reads 0
        assert_eq!(dev.pending_interrupt(), Some(3));
        assert!(dev.detach_peripheral(CtlId::port('A')).is_some());
        assert_eq!(dev.pending_interrupt(), None);
        assert_eq!(dev.interrupt_state(3), VectorState::Unused);
        // plain storage now
        dev.write_ioreg(0x401, 0xFF);
        assert_eq!(dev.read_ioreg(0x401), 0xFF);
        assert!(dev.detach_peripheral(CtlId::port('A')).is_none());
    }

    #[test]
    fn test_intc_signal_probe() {
        let mut dev = port_device();
        let sig = dev.get_signal(CtlId::INTC, 0).unwrap();
        let probe = dev.add_probe(sig);
        dev.write_ioreg(0x410, 0x05);
        assert!(dev.ack_interrupt(3));
        // INTFLAGS still set, so the request comes back
        assert_eq!(dev.interrupt_state(3), VectorState::Raised);
        let ids: Vec<u16> = dev.probe(probe).unwrap().history().iter().map(|d| d.sigid).collect();
        assert_eq!(&ids[..2], &[crate::interrupt::SIG_INT_RAISED, SIG_INT_ACKNOWLEDGED]);
    }

    #[test]
    fn test_sleep_and_wakeup() {
        let mut dev = port_device();
        dev.sleep(SleepMode::Idle);
        // not running yet
        assert_eq!(dev.state(), DeviceState::Ready);
        dev.load_firmware(&firmware()).unwrap();
        dev.sleep(SleepMode::Standby);
        assert_eq!(dev.state(), DeviceState::Sleeping);
        assert_eq!(dev.sleep_mode(), SleepMode::Standby);
        dev.wakeup();
        assert_eq!(dev.state(), DeviceState::Running);
        assert_eq!(dev.sleep_mode(), SleepMode::Active);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut dev = port_device();
        dev.write_ioreg(0x400, 0x0F);
        dev.write_ioreg(0x404, 0x05);
        let snap = dev.snapshot().unwrap();

        dev.write_ioreg(0x404, 0x0A);
        dev.write_ioreg(0x400, 0x00);
        dev.restore(&snap).unwrap();

        let pa0 = dev.find_pin("PA0").unwrap();
        assert_eq!(dev.read_ioreg(0x400), 0x0F);
        assert_eq!(dev.read_ioreg(0x404), 0x05);
        assert_eq!(dev.pin_state(pa0), Some(PinState::High));
        // the port picks up from the restored DIR/OUT
        dev.write_ioreg(0x405, 0x02);
        assert_eq!(dev.read_ioreg(0x404), 0x07);
    }
}
