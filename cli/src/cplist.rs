//! Parsing `cp` item lists: a sequence of cp operations and
//! expectations, given on the command line, which is executed as one
//! batch.
//!
//! Each item is an operation name (optionally with a leading `-`)
//! followed by its arguments, for example
//!
//! ```text
//! -wal 0177570 -rm -edata 0 0177400 -brm 4 -edone 4 -rstat
//! ```
//!
//! Block data (`wblk`, `bwm`, `eblock`) is written as one argument
//! of comma separated words.  The mask of `edata` and `estat` is
//! optional.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::iter::Peekable;
use std::slice::Iter;

use base::prelude::*;
use cpu::{CpBatch, CpuError, W11Cpu};

#[derive(Debug)]
pub enum CpListError {
    UnknownItem(String),
    MissingArgument { item: String },
    BadNumber { item: String, value: String },
    Cpu(CpuError),
}

impl Display for CpListError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            CpListError::UnknownItem(item) => write!(f, "unknown cp item '{item}'"),
            CpListError::MissingArgument { item } => {
                write!(f, "cp item '{item}' is missing an argument")
            }
            CpListError::BadNumber { item, value } => {
                write!(f, "cp item '{item}': '{value}' is not a number")
            }
            CpListError::Cpu(e) => write!(f, "{e}"),
        }
    }
}

impl Error for CpListError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CpListError::Cpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CpuError> for CpListError {
    fn from(e: CpuError) -> CpListError {
        CpListError::Cpu(e)
    }
}

struct Items<'a> {
    tokens: Peekable<Iter<'a, String>>,
}

impl<'a> Items<'a> {
    fn arg(&mut self, item: &str) -> Result<&'a str, CpListError> {
        self.tokens
            .next()
            .map(String::as_str)
            .ok_or_else(|| CpListError::MissingArgument {
                item: item.to_string(),
            })
    }

    fn u16(&mut self, item: &str) -> Result<u16, CpListError> {
        let value = self.arg(item)?;
        parse_u16(value).map_err(|_| bad_number(item, value))
    }

    fn u8(&mut self, item: &str) -> Result<u8, CpListError> {
        let value = self.arg(item)?;
        parse_u32(value)
            .ok()
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| bad_number(item, value))
    }

    fn count(&mut self, item: &str) -> Result<usize, CpListError> {
        Ok(usize::from(self.u16(item)?))
    }

    fn words(&mut self, item: &str) -> Result<Vec<u16>, CpListError> {
        let value = self.arg(item)?;
        value
            .split(',')
            .map(|w| parse_u16(w).map_err(|_| bad_number(item, w)))
            .collect()
    }

    /// The next token, if it is a number.
    fn optional_u16(&mut self) -> Option<u16> {
        let value = parse_u16(self.tokens.peek()?).ok()?;
        self.tokens.next();
        Some(value)
    }
}

fn bad_number(item: &str, value: &str) -> CpListError {
    CpListError::BadNumber {
        item: item.to_string(),
        value: value.to_string(),
    }
}

/// Add the operations described by `tokens` to `batch`.  rbus and
/// ibus addresses may be given by name.
pub fn add_items(cpu: &W11Cpu, batch: &mut CpBatch, tokens: &[String]) -> Result<(), CpListError> {
    let mut items = Items {
        tokens: tokens.iter().peekable(),
    };
    while let Some(token) = items.tokens.next() {
        let item = token.trim_start_matches('-');
        match item {
            "rreg" => {
                let address = cpu.rbus_address(items.arg(item)?)?;
                batch.rreg(address)?;
            }
            "wreg" => {
                let address = cpu.rbus_address(items.arg(item)?)?;
                batch.wreg(address, items.u16(item)?)?;
            }
            "rblk" => {
                let address = cpu.rbus_address(items.arg(item)?)?;
                batch.rblk(address, items.count(item)?)?;
            }
            "wblk" => {
                let address = cpu.rbus_address(items.arg(item)?)?;
                batch.wblk(address, items.words(item)?)?;
            }
            "labo" => {
                batch.labo()?;
            }
            "attn" => {
                batch.attn()?;
            }
            "rr" => {
                batch.rr(items.u8(item)?)?;
            }
            "wr" => {
                let n = items.u8(item)?;
                batch.wr(n, items.u16(item)?)?;
            }
            "rpc" => {
                batch.rpc()?;
            }
            "wpc" => {
                batch.wpc(items.u16(item)?)?;
            }
            "rsp" => {
                batch.rsp()?;
            }
            "wsp" => {
                batch.wsp(items.u16(item)?)?;
            }
            "rps" => {
                batch.rps()?;
            }
            "wps" => {
                batch.wps(items.u16(item)?)?;
            }
            "rstat" => {
                batch.rstat()?;
            }
            "rconf" => {
                batch.rconf()?;
            }
            "ral" => {
                batch.ral()?;
            }
            "rah" => {
                batch.rah()?;
            }
            "wal" => {
                let address = cpu.ibus_address(items.arg(item)?)?;
                batch.wal(address)?;
            }
            "wah" => {
                batch.wah(items.u16(item)?)?;
            }
            "rm" => {
                batch.rm()?;
            }
            "rmi" => {
                batch.rmi()?;
            }
            "wm" => {
                batch.wm(items.u16(item)?)?;
            }
            "wmi" => {
                batch.wmi(items.u16(item)?)?;
            }
            "brm" => {
                batch.brm(items.count(item)?)?;
            }
            "bwm" => {
                batch.bwm(items.words(item)?)?;
            }
            "ribr" => {
                let address = cpu.ibus_address(items.arg(item)?)?;
                batch.ribr(address)?;
            }
            "wibr" => {
                let address = cpu.ibus_address(items.arg(item)?)?;
                batch.wibr(address, items.u16(item)?)?;
            }
            "start" => {
                batch.start()?;
            }
            "stop" => {
                batch.stop()?;
            }
            "step" => {
                batch.step()?;
            }
            "creset" => {
                batch.creset()?;
            }
            "breset" => {
                batch.breset()?;
            }
            "suspend" => {
                batch.suspend()?;
            }
            "resume" => {
                batch.resume()?;
            }
            "stapc" => {
                batch.stapc(items.u16(item)?)?;
            }
            "edata" => {
                let value = items.u16(item)?;
                batch.edata(value, items.optional_u16().unwrap_or(0xffff))?;
            }
            "eblock" => {
                batch.eblock(items.words(item)?, Vec::new())?;
            }
            "edone" => {
                batch.edone(items.u16(item)?)?;
            }
            "estat" => {
                let value = items.u8(item)?;
                let mask = match items.optional_u16() {
                    Some(mask) => {
                        u8::try_from(mask).map_err(|_| bad_number(item, &format!("{mask:o}")))?
                    }
                    None => 0xff,
                };
                batch.estat(value, mask)?;
            }
            "estaterr" => batch.estat_err()?,
            "estatnak" => batch.estat_nak()?,
            "estattout" => batch.estat_tout()?,
            "estatmerr" => batch.estat_merr()?,
            _ => return Err(CpListError::UnknownItem(token.clone())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cpu::{CpuConfig, SimConfig, SimulatedW11};
    use rlink::{Connection, LinkConfig};

    use super::*;

    fn cpu() -> W11Cpu {
        let sim = SimulatedW11::new(&CpuConfig::default(), &SimConfig::default());
        let connection = Arc::new(Connection::new(Box::new(sim), LinkConfig::default()));
        W11Cpu::new(connection, &CpuConfig::default()).expect("CPU should attach")
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_items_build_one_batch() {
        let cpu = cpu();
        let mut batch = cpu.new_batch();
        let items = tokens(concat!(
            "-wr 1 0o1234 -rr 1 -edata 0o1234 ",
            "-wal 01000 -bwm 1,2,3 ",
            "-wal 01000 -brm 3 -eblock 1,2,3 -edone 3 ",
            "rstat"
        ));
        add_items(&cpu, &mut batch, &items).unwrap();
        assert_eq!(batch.len(), 7);
        assert!(cpu.execute(&mut batch).unwrap().all_passed());
        assert_eq!(batch.data(1), 0o1234);
        assert_eq!(batch.result(5).unwrap().block(), &[1, 2, 3]);
        let listing = batch.batch().to_string();
        assert_eq!(listing.lines().filter(|l| l.ends_with(" OK")).count(), 7);
    }

    #[test]
    fn test_optional_mask() {
        let cpu = cpu();
        let mut batch = cpu.new_batch();
        add_items(&cpu, &mut batch, &tokens("-rr 0 -edata 0o17 0o7 -rr 1 -edata 5 -rpc")).unwrap();
        assert_eq!(batch.len(), 3);
        let first = batch.batch().get(0).unwrap().expectation.data();
        let second = batch.batch().get(1).unwrap().expectation.data();
        assert_eq!(first, Some((0o17, 0o7)));
        assert_eq!(second, Some((5, 0xffff)));
    }

    #[test]
    fn test_bad_items() {
        let cpu = cpu();
        let mut batch = cpu.new_batch();
        assert!(matches!(
            add_items(&cpu, &mut batch, &tokens("-frob")),
            Err(CpListError::UnknownItem(_))
        ));
        assert!(matches!(
            add_items(&cpu, &mut batch, &tokens("-wreg conf")),
            Err(CpListError::MissingArgument { .. })
        ));
        assert!(matches!(
            add_items(&cpu, &mut batch, &tokens("-brm many")),
            Err(CpListError::BadNumber { .. })
        ));
        assert!(matches!(
            add_items(&cpu, &mut batch, &tokens("-rreg nosuchreg")),
            Err(CpListError::Cpu(CpuError::UnknownName(_)))
        ));
    }
}
