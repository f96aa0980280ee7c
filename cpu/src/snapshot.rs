//! Decoding and displaying the processor state.
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use super::regs::{cpstat, mmu, UBMAP_WORDS};

/// Processor modes, indexed by the two-bit mode fields of the PS.
const MODE_NAMES: [&str; 4] = ["k", "s", "?", "u"];

/// The run state field of the cp status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunState(u8);

impl RunState {
    const NAMES: [&'static str; 16] = [
        "init", "HALTed", "reset", "stopped", "stepped", "suspend", "hbpt", "..run..", "F:vecfet",
        "F:redstk", "1010", "1011", "F:seq", "F:vmbox", "1101", "1111",
    ];

    pub const INIT: RunState = RunState(0o0);
    pub const HALTED: RunState = RunState(0o1);
    pub const RESET: RunState = RunState(0o2);
    pub const STOPPED: RunState = RunState(0o3);
    pub const STEPPED: RunState = RunState(0o4);
    pub const SUSPENDED: RunState = RunState(0o5);
    pub const BREAKPOINT: RunState = RunState(0o6);
    pub const RUNNING: RunState = RunState(0o7);

    #[must_use]
    pub fn from_stat(stat: u16) -> RunState {
        RunState(((stat >> cpstat::RUST_SHIFT) & cpstat::RUST_MASK) as u8)
    }

    /// The value as it appears in the cp status register.
    #[must_use]
    pub fn to_stat_bits(self) -> u16 {
        u16::from(self.0) << cpstat::RUST_SHIFT
    }

    #[must_use]
    pub fn code(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        RunState::NAMES[usize::from(self.0 & 0o17)]
    }

    #[must_use]
    pub fn is_running(self) -> bool {
        self == RunState::RUNNING
    }

    /// True for the states the CPU enters after a fatal error.
    #[must_use]
    pub fn is_fault(self) -> bool {
        matches!(self.0, 0o10 | 0o11 | 0o14 | 0o15)
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(self.name())
    }
}

/// The fields of the processor status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Psw {
    pub bits: u16,
}

impl Psw {
    #[must_use]
    pub fn current_mode(&self) -> u16 {
        (self.bits >> 14) & 0o3
    }

    #[must_use]
    pub fn previous_mode(&self) -> u16 {
        (self.bits >> 12) & 0o3
    }

    #[must_use]
    pub fn register_set(&self) -> u16 {
        (self.bits >> 11) & 0o1
    }

    #[must_use]
    pub fn priority(&self) -> u16 {
        (self.bits >> 5) & 0o7
    }

    #[must_use]
    pub fn trace(&self) -> u16 {
        (self.bits >> 4) & 0o1
    }

    #[must_use]
    pub fn nzvc(&self) -> u16 {
        self.bits & 0o17
    }
}

impl Display for Psw {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{:06o} cm,pm={},{} s,p,t={},{},{} NZVC={:04b}",
            self.bits,
            MODE_NAMES[usize::from(self.current_mode())],
            MODE_NAMES[usize::from(self.previous_mode())],
            self.register_set(),
            self.priority(),
            self.trace(),
            self.nzvc()
        )
    }
}

/// PC, PS and run state, and optionally R0..R6 as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuSnapshot {
    pub pc: u16,
    pub psw: Psw,
    pub stat: u16,
    pub registers: Option<[u16; 7]>,
}

impl CpuSnapshot {
    #[must_use]
    pub fn run_state(&self) -> RunState {
        RunState::from_stat(self.stat)
    }

    fn status_line(&self) -> String {
        let rust = self.run_state();
        format!("  PS: {}  rust: {:02o} {}", self.psw, rust.code(), rust.name())
    }

    /// The one-line "PC and PS" form.
    #[must_use]
    pub fn format_pcps(&self) -> String {
        format!("  PC: {:06o}{}\n", self.pc, self.status_line())
    }

    /// The full form including the general registers, when they were
    /// read.
    #[must_use]
    pub fn format_r0ps(&self) -> String {
        let r = self.registers.unwrap_or_default();
        format!(
            "Processor registers and status:\n{}\n  \
             R0: {:06o}  R1: {:06o}  R2: {:06o}  R3: {:06o}\n  \
             R4: {:06o}  R5: {:06o}  SP: {:06o}  PC: {:06o}\n",
            self.status_line(),
            r[0],
            r[1],
            r[2],
            r[3],
            r[4],
            r[5],
            r[6],
            self.pc
        )
    }
}

impl Display for CpuSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        if self.registers.is_some() {
            f.write_str(&self.format_r0ps())
        } else {
            f.write_str(&self.format_pcps())
        }
    }
}

/// Names of the PDR access control field values.
const ACF_NAMES: [&str; 8] = [
    "nres ", "r -r ", "r    ", "011  ", "rw-rw", "rw- w", "rw   ", "111  ",
];

/// The modes with their own PDR/PAR set, in the order of
/// [`MmuSnapshot::asr`].
const ASR_MODES: [&str; 3] = ["km", "sm", "um"];

/// A page descriptor register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pdr(pub u16);

impl Pdr {
    /// Page length field.
    #[must_use]
    pub fn plf(self) -> u16 {
        (self.0 >> 8) & 0o177
    }

    #[must_use]
    pub fn accessed(self) -> bool {
        self.0 & 0o200 != 0
    }

    #[must_use]
    pub fn written(self) -> bool {
        self.0 & 0o100 != 0
    }

    /// The page grows downwards.
    #[must_use]
    pub fn expand_down(self) -> bool {
        self.0 & 0o10 != 0
    }

    /// Access control field.
    #[must_use]
    pub fn acf(self) -> u16 {
        self.0 & 0o7
    }
}

impl Display for Pdr {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "{:06o} {:3} {}{} {} {}",
            self.0,
            self.plf(),
            u8::from(self.accessed()),
            u8::from(self.written()),
            if self.expand_down() { "d" } else { "u" },
            ACF_NAMES[usize::from(self.acf())]
        )
    }
}

/// The memory management registers: MMR0..MMR3 and the PDR/PAR sets
/// of kernel, supervisor and user mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MmuSnapshot {
    pub mmr: [u16; 4],
    /// Per mode: I space PDRs, D space PDRs, I space PARs, D space
    /// PARs, 8 words each.
    pub asr: [[u16; mmu::ASR_WORDS]; 3],
}

impl MmuSnapshot {
    /// The register changes recorded in MMR1 as (register, amount)
    /// pairs; a zero amount means no change was recorded.
    #[must_use]
    pub fn mmr1_changes(&self) -> [(u16, i16); 2] {
        let field = |shift: u16| {
            let register = (self.mmr[1] >> shift) & 0o7;
            let raw = ((self.mmr[1] >> (shift + 3)) & 0o37) as i16;
            let amount = if raw & 0o20 != 0 { raw - 0o40 } else { raw };
            (register, amount)
        };
        [field(0), field(8)]
    }

    #[must_use]
    pub fn ubmap_enabled(&self) -> bool {
        self.mmr[3] & mmu::MMR3_M_UBMAP != 0
    }

    #[must_use]
    pub fn mapping_22bit(&self) -> bool {
        self.mmr[3] & mmu::MMR3_M_22BIT != 0
    }

    /// D space enables for kernel, supervisor and user mode.
    #[must_use]
    pub fn dspace(&self) -> [bool; 3] {
        [
            mmu::MMR3_M_DSPACE_K,
            mmu::MMR3_M_DSPACE_S,
            mmu::MMR3_M_DSPACE_U,
        ]
        .map(|bit| self.mmr[3] & bit != 0)
    }

    /// The PDR of `page` in mode `mode` (an index into [`ASR_MODES`]),
    /// I space when `space` is 0 and D space when it is 1.
    fn pdr(&self, mode: usize, space: usize, page: usize) -> Pdr {
        Pdr(self.asr[mode][8 * space + page])
    }

    fn par(&self, mode: usize, space: usize, page: usize) -> u16 {
        self.asr[mode][16 + 8 * space + page]
    }
}

impl Display for MmuSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        writeln!(f, "mmu:")?;
        writeln!(f, "mmr0={:06o}", self.mmr[0])?;
        write!(f, "mmr1={:06o}", self.mmr[1])?;
        for (register, amount) in self.mmr1_changes() {
            if amount != 0 {
                write!(f, "  r{register}:{amount:3}")?;
            }
        }
        writeln!(f)?;
        writeln!(f, "mmr2={:06o}", self.mmr[2])?;
        let [k, s, u] = self.dspace().map(u8::from);
        writeln!(
            f,
            "mmr3={:06o}  ubmap={}  22bit={}  d-space k,s,u={k},{s},{u}",
            self.mmr[3],
            u8::from(self.ubmap_enabled()),
            u8::from(self.mapping_22bit())
        )?;
        for (mode, name) in ASR_MODES.iter().enumerate() {
            writeln!(
                f,
                "{name}    I pdr plf aw d acf     I par     D pdr plf aw d acf     D par"
            )?;
            for page in 0..8 {
                write!(f, "   {page} ")?;
                for space in 0..2 {
                    if space != 0 {
                        f.write_str("    ")?;
                    }
                    write!(
                        f,
                        "{}  {:06o}",
                        self.pdr(mode, space, page),
                        self.par(mode, space, page)
                    )?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// The Unibus map registers, two words (low, high) per entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnibusMap {
    pub words: Vec<u16>,
}

impl UnibusMap {
    /// The 22-bit base address of map entry `n`.
    #[must_use]
    pub fn entry(&self, n: usize) -> u32 {
        let word = |i: usize| u32::from(self.words.get(i).copied().unwrap_or(0));
        (word(2 * n) | word(2 * n + 1) << 16) & 0o17777777
    }
}

impl Display for UnibusMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        writeln!(f, "unibus map:")?;
        for i in 0..8 {
            for j in [0, 0o10, 0o20, 0o30] {
                if j != 0 {
                    f.write_str("  ")?;
                }
                write!(f, "{:02o} {:08o}", i + j, self.entry(i + j))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Default for UnibusMap {
    fn default() -> UnibusMap {
        UnibusMap {
            words: vec![0; UBMAP_WORDS],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psw_fields() {
        let psw = Psw { bits: 0o170377 };
        assert_eq!(psw.current_mode(), 3);
        assert_eq!(psw.previous_mode(), 3);
        assert_eq!(psw.register_set(), 0);
        assert_eq!(psw.priority(), 7);
        assert_eq!(psw.trace(), 1);
        assert_eq!(psw.nzvc(), 0o17);
        assert_eq!(
            psw.to_string(),
            "170377 cm,pm=u,u s,p,t=0,7,1 NZVC=1111"
        );
    }

    #[test]
    fn test_run_state_names() {
        assert_eq!(RunState::from_stat(0o1 << 4).name(), "HALTed");
        assert_eq!(RunState::from_stat(0o7 << 4 | 0o17).name(), "..run..");
        assert_eq!(RunState::from_stat(0o15 << 4).name(), "F:vmbox");
        assert!(RunState::from_stat(0o11 << 4).is_fault());
        assert_eq!(RunState::STOPPED.to_stat_bits(), 0o60);
    }

    #[test]
    fn test_pcps_line() {
        let snapshot = CpuSnapshot {
            pc: 0o1000,
            psw: Psw { bits: 0o000340 },
            stat: RunState::HALTED.to_stat_bits(),
            registers: None,
        };
        assert_eq!(
            snapshot.format_pcps(),
            "  PC: 001000  PS: 000340 cm,pm=k,k s,p,t=0,7,0 NZVC=0000  rust: 01 HALTed\n"
        );
    }

    #[test]
    fn test_pdr_fields() {
        let pdr = Pdr(0o037716);
        assert_eq!(pdr.plf(), 0o77);
        assert!(pdr.accessed());
        assert!(pdr.written());
        assert!(pdr.expand_down());
        assert_eq!(pdr.acf(), 6);
        assert_eq!(pdr.to_string(), "037716  63 11 d rw   ");
        assert_eq!(Pdr(0o000002).to_string(), "000002   0 00 u r    ");
    }

    #[test]
    fn test_mmr1_sign_extension() {
        let mut snapshot = MmuSnapshot {
            mmr: [0; 4],
            asr: [[0; mmu::ASR_WORDS]; 3],
        };
        // r6 decremented by 2, r2 incremented by 1.
        snapshot.mmr[1] = (0o36 << 3) | 6 | (0o01 << 11) | (2 << 8);
        assert_eq!(snapshot.mmr1_changes(), [(6, -2), (2, 1)]);
        snapshot.mmr[3] = 0o000065;
        assert!(snapshot.ubmap_enabled());
        assert!(snapshot.mapping_22bit());
        assert_eq!(snapshot.dspace(), [true, false, true]);
    }

    #[test]
    fn test_mmu_listing() {
        let mut asr = [[0; mmu::ASR_WORDS]; 3];
        asr[0][0] = 0o077406; // kernel I space page 0
        asr[0][16] = 0o001600; // its PAR
        asr[2][15] = 0o000002; // user D space page 7
        asr[2][31] = 0o177600;
        let snapshot = MmuSnapshot {
            mmr: [0o000001, 0o000366, 0o001234, 0o000020],
            asr,
        };
        let text = snapshot.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5 + 3 * 9);
        assert_eq!(lines[0], "mmu:");
        assert_eq!(lines[1], "mmr0=000001");
        assert_eq!(lines[2], "mmr1=000366  r6: -2");
        assert_eq!(lines[3], "mmr2=001234");
        assert_eq!(
            lines[4],
            "mmr3=000020  ubmap=0  22bit=1  d-space k,s,u=0,0,0"
        );
        assert_eq!(
            lines[5],
            "km    I pdr plf aw d acf     I par     D pdr plf aw d acf     D par"
        );
        assert_eq!(
            lines[6],
            "   0 077406 127 00 u rw     001600    000000   0 00 u nres   000000"
        );
        assert!(lines[14].starts_with("sm "));
        assert_eq!(
            lines[31],
            "   7 000000   0 00 u nres   000000    000002   0 00 u r      177600"
        );
    }

    #[test]
    fn test_unibus_map_listing() {
        let mut map = UnibusMap::default();
        map.words[2] = 0o020000; // entry 1
        map.words[3] = 0o000017;
        map.words[62] = 0o177776; // entry 31
        map.words[63] = 0o177777;
        assert_eq!(map.entry(1), 0o3620000);
        assert_eq!(map.entry(31), 0o17777776);
        let text = map.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "unibus map:");
        assert_eq!(
            lines[1],
            "00 00000000  10 00000000  20 00000000  30 00000000"
        );
        assert_eq!(
            lines[2],
            "01 03620000  11 00000000  21 00000000  31 00000000"
        );
        assert_eq!(
            lines[8],
            "07 00000000  17 00000000  27 00000000  37 17777776"
        );
    }

    #[test]
    fn test_r0ps_lines() {
        let snapshot = CpuSnapshot {
            pc: 0o1004,
            psw: Psw { bits: 0o040004 },
            stat: RunState::STOPPED.to_stat_bits(),
            registers: Some([1, 2, 3, 4, 5, 6, 0o776]),
        };
        assert_eq!(
            snapshot.to_string(),
            "Processor registers and status:\n\
             \x20 PS: 040004 cm,pm=s,k s,p,t=0,0,0 NZVC=0100  rust: 03 stopped\n\
             \x20 R0: 000001  R1: 000002  R2: 000003  R3: 000004\n\
             \x20 R4: 000005  R5: 000006  SP: 000776  PC: 001004\n"
        );
    }
}
