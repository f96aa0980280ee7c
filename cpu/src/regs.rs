//! The w11 console port ("cp") as seen over the link.
//!
//! The cp registers occupy a small window of rbus addresses starting
//! at the CPU's `base`; the I/O page is reachable through a second,
//! larger window starting at `ibase` (one rbus address per ibus word).

pub const CP_CONF: u16 = 0x00;
pub const CP_CNTL: u16 = 0x01;
pub const CP_STAT: u16 = 0x02;
pub const CP_PSW: u16 = 0x03;
pub const CP_AL: u16 = 0x04;
pub const CP_AH: u16 = 0x05;
pub const CP_MEM: u16 = 0x06;
pub const CP_MEMI: u16 = 0x07;
pub const CP_R0: u16 = 0x08;
pub const CP_SP: u16 = CP_R0 + 6;
pub const CP_PC: u16 = CP_R0 + 7;
pub const CP_MEMBE: u16 = 0x10;

/// Number of rbus addresses used by the cp registers.
pub const CP_WINDOW: u16 = 0x11;

/// In AH: the address latch holds a 22-bit physical address.
pub const CPAH_M_22BIT: u16 = 0x40;
/// In AH: the address latch holds an 18-bit Unibus address which is
/// translated through the Unibus map.
pub const CPAH_M_UBM22: u16 = 0x80;
pub const CPAH_M_ADDR: u16 = 0o77;

pub const MEMBE_M_BE: u16 = 0x03;
pub const MEMBE_M_STICK: u16 = 0x04;

/// Number of rbus addresses (words) in the ibus window.
pub const IBUS_WINDOW: u16 = 0x1000;

/// Function codes written to [`CP_CNTL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpFunction {
    Noop = 0,
    Start = 1,
    Stop = 2,
    Step = 3,
    CpuReset = 4,
    BusReset = 5,
    Suspend = 6,
    Resume = 7,
}

impl CpFunction {
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    #[must_use]
    pub const fn from_code(code: u16) -> Option<CpFunction> {
        match code {
            0 => Some(CpFunction::Noop),
            1 => Some(CpFunction::Start),
            2 => Some(CpFunction::Stop),
            3 => Some(CpFunction::Step),
            4 => Some(CpFunction::CpuReset),
            5 => Some(CpFunction::BusReset),
            6 => Some(CpFunction::Suspend),
            7 => Some(CpFunction::Resume),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            CpFunction::Noop => "noop",
            CpFunction::Start => "start",
            CpFunction::Stop => "stop",
            CpFunction::Step => "step",
            CpFunction::CpuReset => "creset",
            CpFunction::BusReset => "breset",
            CpFunction::Suspend => "suspend",
            CpFunction::Resume => "resume",
        }
    }
}

/// Bits of the [`CP_STAT`] register.
pub mod cpstat {
    pub const CMD_ERR: u16 = 0x0001;
    pub const CMD_MERR: u16 = 0x0002;
    pub const CPU_GO: u16 = 0x0004;
    pub const CPU_SUSP: u16 = 0x0008;
    pub const RUST_SHIFT: u16 = 4;
    pub const RUST_MASK: u16 = 0o17;
    pub const SUSP_INT: u16 = 0x0100;
    pub const SUSP_EXT: u16 = 0x0200;
}

/// The w11 specific bits 7..4 of the link status byte.
pub mod stat {
    pub const CMD_ERR: u8 = 0x80;
    pub const CMD_MERR: u8 = 0x40;
    pub const CPU_SUSP: u8 = 0x20;
    pub const CPU_GO: u8 = 0x10;
}

/// Memory management registers in the I/O page.
pub mod mmu {
    /// MMR0, followed by MMR1 and MMR2.
    pub const MMR0: u16 = 0o177572;
    pub const MMR3: u16 = 0o172516;
    /// The PDR/PAR block of each mode: 8 I space PDRs, 8 D space
    /// PDRs, then the I and D space PARs.
    pub const ASR_KERNEL: u16 = 0o172300;
    pub const ASR_SUPERVISOR: u16 = 0o172200;
    pub const ASR_USER: u16 = 0o177600;
    pub const ASR_WORDS: usize = 32;

    pub const MMR3_M_UBMAP: u16 = 0o000040;
    pub const MMR3_M_22BIT: u16 = 0o000020;
    pub const MMR3_M_DSPACE_K: u16 = 0o000004;
    pub const MMR3_M_DSPACE_S: u16 = 0o000002;
    pub const MMR3_M_DSPACE_U: u16 = 0o000001;
}

/// The Unibus map: 32 mapping registers of two words each.
pub const UBMAP_BASE: u16 = 0o170200;
pub const UBMAP_WORDS: usize = 64;

/// Well known I/O page addresses, used to seed the ibus name map.
pub const IBUS_NAMES: &[(&str, u16)] = &[
    ("psw", 0o177776),
    ("stklim", 0o177774),
    ("pirq", 0o177772),
    ("mbrk", 0o177770),
    ("cpuerr", 0o177766),
    ("sysid", 0o177764),
    ("mmr2", 0o177576),
    ("mmr1", 0o177574),
    ("mmr0", 0o177572),
    ("sdreg", 0o177570),
    ("mmr3", 0o172516),
];

/// Names of the cp registers, relative to the CPU base.
pub const CP_NAMES: &[(&str, u16)] = &[
    ("conf", CP_CONF),
    ("cntl", CP_CNTL),
    ("stat", CP_STAT),
    ("psw", CP_PSW),
    ("al", CP_AL),
    ("ah", CP_AH),
    ("mem", CP_MEM),
    ("memi", CP_MEMI),
    ("r0", CP_R0),
    ("r1", CP_R0 + 1),
    ("r2", CP_R0 + 2),
    ("r3", CP_R0 + 3),
    ("r4", CP_R0 + 4),
    ("r5", CP_R0 + 5),
    ("sp", CP_SP),
    ("pc", CP_PC),
    ("membe", CP_MEMBE),
];

/// The rbus address through which the ibus word at `ibaddr` is
/// reached.
#[must_use]
pub const fn ibus_window_address(ibase: u16, ibaddr: u16) -> u16 {
    ibase.wrapping_add((ibaddr & 0o17777) >> 1)
}

#[test]
fn test_ibus_window_address() {
    assert_eq!(ibus_window_address(0x4000, 0o160000), 0x4000);
    assert_eq!(ibus_window_address(0x4000, 0o177776), 0x4fff);
    assert_eq!(ibus_window_address(0x4000, 0o177570), 0x4000 + (0o17570 >> 1));
}

#[test]
fn test_function_codes() {
    for code in 0..8 {
        assert_eq!(CpFunction::from_code(code).map(CpFunction::code), Some(code));
    }
    assert_eq!(CpFunction::from_code(8), None);
}
