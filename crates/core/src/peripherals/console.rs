//! Debug console: the firmware writes characters to a dedicated register,
//! each newline emits the buffered line to the device.

use tracing::warn;

use crate::bus::CoreRequest;
use crate::ioreg::IoRegWrite;
use crate::peripheral::{Ctx, CtlData, CtlReq, Peripheral};
use crate::types::{CtlId, RegAddr};

/// Bind the console to the register given as `data` (Uint).
pub const CTLREQ_CONSOLE_SET_REGISTER: CtlReq = 1;

pub struct Console {
    reg: Option<RegAddr>,
    buf: String,
}

impl Console {
    pub fn new() -> Self {
        Console { reg: None, buf: String::new() }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Console {
    fn ctl_id(&self) -> CtlId {
        CtlId::CONSOLE
    }

    fn reset(&mut self, ctx: &mut Ctx<'_>) {
        if !self.buf.is_empty() {
            warn!(device = %ctx.name(), "console output lost by reset");
        }
        self.buf.clear();
    }

    fn ctlreq(&mut self, ctx: &mut Ctx<'_>, req: CtlReq, data: &mut CtlData) -> bool {
        if req != CTLREQ_CONSOLE_SET_REGISTER {
            return false;
        }
        if self.reg.is_some() {
            return true;
        }
        let addr = data.data.as_uint() as RegAddr;
        if addr == 0 {
            return false;
        }
        match ctx.add_ioreg(addr, 0xFF, 0) {
            Ok(()) => {
                self.reg = Some(addr);
                true
            }
            Err(e) => {
                warn!(device = %ctx.name(), error = %e, "console register unavailable");
                false
            }
        }
    }

    fn ioreg_write_handler(&mut self, ctx: &mut Ctx<'_>, addr: RegAddr, data: IoRegWrite) {
        if Some(addr) != self.reg {
            return;
        }
        if data.value == b'\n' {
            let line = std::mem::take(&mut self.buf);
            ctx.post(CoreRequest::ConsoleLine(line));
        } else {
            self.buf.push(data.value as char);
        }
    }
}
