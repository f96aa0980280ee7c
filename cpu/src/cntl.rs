//! Device controllers attached to a CPU.
//!
//! The CPU facade knows controllers only through the [`Controller`]
//! trait: it can list them, show their probe status and ask one for
//! the boot code of a unit.  Device emulation lives elsewhere.
use std::fmt::Write as _;

use super::error::CpuError;

/// The result of probing for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeStatus {
    /// True when the controller responded to its probe.
    pub found: bool,
    /// It responded on the CPU side (ibus).
    pub internal: bool,
    /// It responded on the link side (rbus).
    pub remote: bool,
}

impl ProbeStatus {
    fn indicator(present: bool) -> char {
        if present {
            'y'
        } else {
            'n'
        }
    }
}

/// Code which boots a unit: `words` are loaded at `load_address` and
/// the CPU is started at `start` with the unit number in R0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCode {
    pub load_address: u16,
    pub words: Vec<u16>,
    pub start: u16,
}

pub trait Controller: Send + Sync {
    fn name(&self) -> &str;
    /// The device type, e.g. "rk11".
    fn kind(&self) -> &str;
    /// The controller's first register in the I/O page.
    fn base(&self) -> u16;
    /// The attention bit used by the controller, if any.
    fn lam(&self) -> Option<u8>;
    fn unit_count(&self) -> usize;
    fn probe_status(&self) -> ProbeStatus;
    fn enabled(&self) -> bool {
        true
    }
    fn started(&self) -> bool {
        true
    }
    /// Where the medium for `unit` comes from, if it is attached.
    fn attachment(&self, _unit: usize) -> Option<String> {
        None
    }
    fn boot_code(&self, unit: usize) -> Result<BootCode, CpuError>;
}

/// Split a unit name like `rk1` into controller name and unit number.
pub fn parse_unit_name(unit: &str) -> Result<(&str, usize), CpuError> {
    let digits = unit.len()
        - unit
            .chars()
            .rev()
            .take_while(char::is_ascii_digit)
            .count();
    let (name, number) = unit.split_at(digits);
    if name.is_empty() || number.is_empty() {
        return Err(CpuError::UnknownUnit(unit.to_string()));
    }
    number
        .parse()
        .map(|n| (name, n))
        .map_err(|_| CpuError::UnknownUnit(unit.to_string()))
}

/// One row of the controller table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSummary {
    pub name: String,
    pub kind: String,
    pub base: u16,
    pub lam: Option<u8>,
    pub probe: ProbeStatus,
    pub enabled: bool,
    pub started: bool,
    /// (unit name, attachment) for every attached unit.
    pub attached: Vec<(String, String)>,
}

impl ControllerSummary {
    #[must_use]
    pub fn of(cntl: &dyn Controller) -> ControllerSummary {
        ControllerSummary {
            name: cntl.name().to_string(),
            kind: cntl.kind().to_string(),
            base: cntl.base(),
            lam: cntl.lam(),
            probe: cntl.probe_status(),
            enabled: cntl.enabled(),
            started: cntl.started(),
            attached: (0..cntl.unit_count())
                .filter_map(|unit| {
                    cntl.attachment(unit)
                        .map(|url| (format!("{}{unit}", cntl.name()), url))
                })
                .collect(),
        }
    }
}

/// Render the controller table followed by the attached units.
#[must_use]
pub fn format_controller_table(rows: &[ControllerSummary]) -> String {
    let flag = |b: bool| u8::from(b);
    let mut out = String::from("name type  ibbase lam  probe ena on\n");
    for row in rows {
        let lam = row.lam.map_or_else(|| "-".to_string(), |l| l.to_string());
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{:<4} {:<5} {:06o} {:>3}  {} {} {}  {}  {}",
            row.name,
            row.kind,
            row.base,
            lam,
            flag(row.probe.found),
            ProbeStatus::indicator(row.probe.internal),
            ProbeStatus::indicator(row.probe.remote),
            flag(row.enabled),
            flag(row.started)
        );
    }
    out.push_str("\nname  attachurl\n");
    for (unit, url) in rows.iter().flat_map(|row| row.attached.iter()) {
        let _ = writeln!(out, "{unit:<5} {url}");
    }
    out
}

/// A controller described entirely by configuration.  Every unit
/// boots with the same code.
#[derive(Debug, Clone)]
pub struct StaticController {
    pub name: String,
    pub kind: String,
    pub base: u16,
    pub lam: Option<u8>,
    pub units: usize,
    pub probe: ProbeStatus,
    pub boot: Option<BootCode>,
    pub attachments: Vec<Option<String>>,
}

impl StaticController {
    #[must_use]
    pub fn new(name: &str, kind: &str, base: u16) -> StaticController {
        StaticController {
            name: name.to_string(),
            kind: kind.to_string(),
            base,
            lam: None,
            units: 1,
            probe: ProbeStatus {
                found: true,
                internal: true,
                remote: false,
            },
            boot: None,
            attachments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_units(mut self, units: usize) -> StaticController {
        self.units = units;
        self
    }

    #[must_use]
    pub fn with_lam(mut self, lam: u8) -> StaticController {
        self.lam = Some(lam);
        self
    }

    #[must_use]
    pub fn with_boot_code(mut self, boot: BootCode) -> StaticController {
        self.boot = Some(boot);
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, unit: usize, url: &str) -> StaticController {
        if self.attachments.len() <= unit {
            self.attachments.resize(unit + 1, None);
        }
        self.attachments[unit] = Some(url.to_string());
        self
    }
}

impl Controller for StaticController {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn base(&self) -> u16 {
        self.base
    }

    fn lam(&self) -> Option<u8> {
        self.lam
    }

    fn unit_count(&self) -> usize {
        self.units
    }

    fn probe_status(&self) -> ProbeStatus {
        self.probe
    }

    fn attachment(&self, unit: usize) -> Option<String> {
        self.attachments.get(unit).cloned().flatten()
    }

    fn boot_code(&self, unit: usize) -> Result<BootCode, CpuError> {
        if unit >= self.units {
            return Err(CpuError::UnknownUnit(format!("{}{unit}", self.name)));
        }
        self.boot
            .clone()
            .ok_or_else(|| CpuError::UnknownUnit(format!("{}{unit} is not bootable", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unit_name() {
        assert_eq!(parse_unit_name("rk0").unwrap(), ("rk", 0));
        assert_eq!(parse_unit_name("tm12").unwrap(), ("tm", 12));
        assert!(matches!(parse_unit_name("rk"), Err(CpuError::UnknownUnit(_))));
        assert!(matches!(parse_unit_name("17"), Err(CpuError::UnknownUnit(_))));
    }

    #[test]
    fn test_controller_table() {
        let rk = StaticController::new("rka", "rk11", 0o177400)
            .with_lam(4)
            .with_units(2)
            .with_attachment(1, "disk.dsk");
        let table = format_controller_table(&[ControllerSummary::of(&rk)]);
        assert_eq!(
            table,
            "name type  ibbase lam  probe ena on\n\
             rka  rk11  177400   4  1 y n  1  1\n\
             \n\
             name  attachurl\n\
             rka1  disk.dsk\n"
        );
    }

    #[test]
    fn test_boot_code_unit_check() {
        let boot = BootCode {
            load_address: 0o2000,
            words: vec![0o12700, 0],
            start: 0o2000,
        };
        let cntl = StaticController::new("dl", "rl11", 0o174400)
            .with_units(4)
            .with_boot_code(boot.clone());
        assert_eq!(cntl.boot_code(3).unwrap(), boot);
        assert!(matches!(cntl.boot_code(4), Err(CpuError::UnknownUnit(_))));
        let plain = StaticController::new("lp", "lp11", 0o177514);
        assert!(plain.boot_code(0).is_err());
    }
}
