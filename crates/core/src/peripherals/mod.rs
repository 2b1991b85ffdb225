//! AVR peripheral models.
//!
//! - [`Console`]: firmware debug output through a dedicated register
//! - [`PortBase`]: pin bookkeeping shared by the GPIO ports
//! - [`Mega0Port`]: megaAVR 0-series PORT with its VPORT mirror
//! - [`ClassicPort`]: classic PIN/DDR/PORT GPIO port
//! - [`Vref`]: supply and reference voltages
//! - [`AnalogComparator`]: 0-series analog comparator (AC0)

pub mod console;
pub mod port;
pub mod mega0_port;
pub mod classic_port;
pub mod vref;
pub mod acp;

pub use console::Console;
pub use port::PortBase;
pub use mega0_port::{Mega0Port, Mega0PortConfig};
pub use classic_port::{ClassicPort, ClassicPortConfig};
pub use vref::{Vref, VrefConfig};
pub use acp::{AcpChannel, AcpConfig, AnalogComparator, ChannelSource};
