//! The configuration file.
//!
//! A TOML file with up to three tables, all optional:
//!
//! ```toml
//! [link]
//! block_size_max = 256
//! reply_timeout_ms = 1000
//!
//! [cpu]
//! base = 0x0000
//! ibase = 0x4000
//! lam = 0
//!
//! [sim]
//! memory_size = 0o1000000
//! run_time_ms = 20
//! ```
//!
//! Controllers are listed as an array of tables:
//!
//! ```toml
//! [[controller]]
//! name = "rk"
//! kind = "rk11"
//! base = 0o177400
//! lam = 4
//! units = 8
//! boot = { load_address = 0o2000, start = 0o2000, words = [0o12700, 0o177412] }
//! ```
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rlink::LinkConfig;

use super::cntl::{BootCode, StaticController};
use serde::{Deserialize, Serialize};

/// Where the CPU's registers are on the link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuConfig {
    /// The rbus address of the first cp register.
    pub base: u16,
    /// The rbus address of the ibus window.
    pub ibase: u16,
    /// The attention bit raised when the CPU stops.
    pub lam: u8,
}

impl Default for CpuConfig {
    fn default() -> CpuConfig {
        CpuConfig {
            base: 0x0000,
            ibase: 0x4000,
            lam: 0,
        }
    }
}

impl CpuConfig {
    #[must_use]
    pub fn lam_mask(&self) -> u16 {
        1u16.checked_shl(u32::from(self.lam)).unwrap_or(0)
    }
}

/// Settings for the simulated target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Size of the simulated memory in bytes.
    pub memory_size: u32,
    /// How long a started CPU runs before it halts by itself.  When
    /// unset it runs until stopped.
    pub run_time_ms: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> SimConfig {
        SimConfig {
            memory_size: 0o1000000,
            run_time_ms: None,
        }
    }
}

impl SimConfig {
    #[must_use]
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BootConfig {
    pub load_address: u16,
    pub start: u16,
    pub words: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    pub name: String,
    pub kind: String,
    pub base: u16,
    pub lam: Option<u8>,
    #[serde(default = "ControllerConfig::default_units")]
    pub units: usize,
    pub boot: Option<BootConfig>,
}

impl ControllerConfig {
    fn default_units() -> usize {
        1
    }

    #[must_use]
    pub fn build(&self) -> StaticController {
        let mut cntl =
            StaticController::new(&self.name, &self.kind, self.base).with_units(self.units);
        if let Some(lam) = self.lam {
            cntl = cntl.with_lam(lam);
        }
        if let Some(boot) = &self.boot {
            cntl = cntl.with_boot_code(BootCode {
                load_address: boot.load_address,
                words: boot.words.clone(),
                start: boot.start,
            });
        }
        cntl
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub link: LinkConfig,
    pub cpu: CpuConfig,
    pub sim: SimConfig,
    pub controller: Vec<ControllerConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, error: io::Error },
    Parse(toml::de::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigError::Read { path, error } => {
                write!(f, "failed to read {}: {error}", path.display())
            }
            ConfigError::Parse(e) => write!(f, "bad configuration: {e}"),
            ConfigError::Invalid(msg) => write!(f, "bad configuration: {msg}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read { error, .. } => Some(error),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> ConfigError {
        ConfigError::Parse(e)
    }
}

impl SystemConfig {
    pub fn parse(text: &str) -> Result<SystemConfig, ConfigError> {
        let config: SystemConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<SystemConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        SystemConfig::parse(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.link.block_size_max == 0 {
            return Err(ConfigError::Invalid(
                "link.block_size_max must be at least 1".to_string(),
            ));
        }
        if self.cpu.lam > 15 {
            return Err(ConfigError::Invalid(format!(
                "cpu.lam {} is not an attention bit (0...15)",
                self.cpu.lam
            )));
        }
        if self.sim.memory_size % 2 != 0 {
            return Err(ConfigError::Invalid(
                "sim.memory_size must be even".to_string(),
            ));
        }
        for (i, cntl) in self.controller.iter().enumerate() {
            if self.controller[..i].iter().any(|c| c.name == cntl.name) {
                return Err(ConfigError::Invalid(format!(
                    "controller {} is listed twice",
                    cntl.name
                )));
            }
            if cntl.lam.is_some_and(|lam| lam > 15) {
                return Err(ConfigError::Invalid(format!(
                    "controller {} has a bad attention bit",
                    cntl.name
                )));
            }
        }
        Ok(())
    }
}
