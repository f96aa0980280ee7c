//! This crate controls a w11 (PDP-11) CPU over an rlink connection.
//!
//! The console port ("cp") of the CPU is a set of rbus registers
//! through which the host starts and stops the CPU, reads and writes
//! its registers and accesses memory.  [`CpBatch`] builds batches of
//! cp operations; [`W11Cpu`] wraps them into the usual console
//! commands and also loads code produced by the `asm-11` assembler or
//! stored in absolute loader format.  [`SimulatedW11`] answers cp
//! operations without hardware.
#![crate_name = "cpu"]

mod cntl;
mod config;
mod cp;
mod error;
pub mod loader;
pub mod regs;
mod sim;
mod snapshot;
mod w11;

pub use cntl::{
    format_controller_table, parse_unit_name, BootCode, Controller, ControllerSummary,
    ProbeStatus, StaticController,
};
pub use config::{
    BootConfig, ConfigError, ControllerConfig, CpuConfig, SimConfig, SystemConfig,
};
pub use cp::{check_ibus_address, AddressMode, CpBatch};
pub use error::CpuError;
pub use regs::CpFunction;
pub use sim::{SimFault, SimHandle, SimulatedW11};
pub use snapshot::{CpuSnapshot, MmuSnapshot, Pdr, Psw, RunState, UnibusMap};
pub use w11::{format_memory_listing, W11Cpu};
