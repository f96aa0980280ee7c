//! Bidirectional name/address tables.
//!
//! The link has a common table shared by everything attached to it
//! and each CPU has tables of its own (one for its rbus registers and
//! one for ibus addresses).  Both directions are kept one-to-one: a
//! name maps to exactly one address and an address carries exactly
//! one name.  Any pre-existing mapping for either the name or the
//! address causes an insert to be refused, even when the pair being
//! inserted is identical to the one already present.
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter, Write};

#[cfg(test)]
use test_strategy::{proptest, Arbitrary};

use serde::Serialize;

/// Failures reported when querying or changing an [`AddressMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    /// The name is already mapped (to `address`).
    NameInUse { name: String, address: u16 },
    /// The address already carries a name.
    AddressInUse { address: u16, name: String },
    /// No mapping exists for this name.
    NotFound(String),
    /// No mapping exists for this address.
    UnknownAddress(u16),
    /// Names which could be mistaken for numbers are not allowed.
    NameLooksNumeric(String),
}

impl Display for MapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            MapError::NameInUse { name, address } => {
                write!(f, "mapping already defined for '{name}' (address {address:06o})")
            }
            MapError::AddressInUse { address, name } => {
                write!(f, "mapping already defined for address {address:06o} ('{name}')")
            }
            MapError::NotFound(name) => write!(f, "no mapping defined for '{name}'"),
            MapError::UnknownAddress(address) => write!(f, "address {address:06o} not mapped"),
            MapError::NameLooksNumeric(name) => {
                write!(f, "name should not look like an integer but '{name}' does")
            }
        }
    }
}

impl Error for MapError {}

/// One row of [`AddressMap::enumerate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapEntry {
    pub address: u16,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct AddressMap {
    by_name: BTreeMap<String, u16>,
    by_address: BTreeMap<u16, String>,
}

fn looks_numeric(name: &str) -> bool {
    crate::number::parse_u32(name).is_ok()
}

impl AddressMap {
    #[must_use]
    pub fn new() -> AddressMap {
        AddressMap::default()
    }

    /// Add a mapping.  Fails without changing the map when either the
    /// name or the address is already mapped.
    pub fn insert(&mut self, name: &str, address: u16) -> Result<(), MapError> {
        if looks_numeric(name) {
            return Err(MapError::NameLooksNumeric(name.to_string()));
        }
        if let Some(existing) = self.by_name.get(name) {
            return Err(MapError::NameInUse {
                name: name.to_string(),
                address: *existing,
            });
        }
        if let Some(existing) = self.by_address.get(&address) {
            return Err(MapError::AddressInUse {
                address,
                name: existing.clone(),
            });
        }
        self.by_name.insert(name.to_string(), address);
        self.by_address.insert(address, name.to_string());
        Ok(())
    }

    pub fn erase_by_name(&mut self, name: &str) -> Result<u16, MapError> {
        match self.by_name.remove(name) {
            Some(address) => {
                self.by_address.remove(&address);
                Ok(address)
            }
            None => Err(MapError::NotFound(name.to_string())),
        }
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn find_by_address(&self, address: u16) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    /// True when `name` is mapped and, if `address` is given, mapped
    /// to that address.
    #[must_use]
    pub fn test_name(&self, name: &str, address: Option<u16>) -> bool {
        match (self.find_by_name(name), address) {
            (Some(found), Some(wanted)) => found == wanted,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    #[must_use]
    pub fn test_address(&self, address: u16) -> bool {
        self.by_address.contains_key(&address)
    }

    /// All mappings, sorted by address.
    #[must_use]
    pub fn enumerate(&self) -> Vec<MapEntry> {
        self.by_address
            .iter()
            .map(|(address, name)| MapEntry {
                address: *address,
                name: name.clone(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// One line per mapping, `address name`, sorted by address.
    #[must_use]
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (address, name) in &self.by_address {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "{address:06o} {name}");
        }
        out
    }
}

#[test]
fn test_insert_then_find() {
    let mut map = AddressMap::new();
    map.insert("cntl", 0o1).expect("first insert should succeed");
    map.insert("stat", 0o2).expect("second insert should succeed");
    assert_eq!(map.find_by_name("cntl"), Some(0o1));
    assert_eq!(map.find_by_address(0o2), Some("stat"));
    assert_eq!(map.find_by_name("psw"), None);
    assert_eq!(map.len(), 2);
}

#[test]
fn test_conflicting_inserts_are_refused() {
    let mut map = AddressMap::new();
    map.insert("al", 0o4).unwrap();
    assert_eq!(
        map.insert("al", 0o5),
        Err(MapError::NameInUse {
            name: "al".to_string(),
            address: 0o4
        })
    );
    assert_eq!(
        map.insert("ah", 0o4),
        Err(MapError::AddressInUse {
            address: 0o4,
            name: "al".to_string()
        })
    );
    // Re-inserting the identical pair is also refused.
    assert!(map.insert("al", 0o4).is_err());
    assert_eq!(map.len(), 1);
    assert_eq!(map.find_by_address(0o5), None);
}

#[test]
fn test_numeric_names_are_refused() {
    let mut map = AddressMap::new();
    assert_eq!(
        map.insert("0177570", 0o10),
        Err(MapError::NameLooksNumeric("0177570".to_string()))
    );
    assert_eq!(
        map.insert("0x20", 0o10),
        Err(MapError::NameLooksNumeric("0x20".to_string()))
    );
    assert!(map.insert("r0", 0o10).is_ok());
}

#[test]
fn test_erase() {
    let mut map = AddressMap::new();
    map.insert("mem", 0o6).unwrap();
    assert_eq!(map.erase_by_name("mem"), Ok(0o6));
    assert_eq!(map.find_by_address(0o6), None);
    assert_eq!(
        map.erase_by_name("mem"),
        Err(MapError::NotFound("mem".to_string()))
    );
    // After erasure both the name and the address are free again.
    map.insert("memi", 0o6).unwrap();
}

#[test]
fn test_enumerate_and_print_are_sorted_by_address() {
    let mut map = AddressMap::new();
    map.insert("zeta", 0o3).unwrap();
    map.insert("alpha", 0o10).unwrap();
    map.insert("mid", 0o1).unwrap();
    let order: Vec<u16> = map.enumerate().iter().map(|e| e.address).collect();
    assert_eq!(order, vec![0o1, 0o3, 0o10]);
    assert_eq!(map.print(), "000001 mid\n000003 zeta\n000010 alpha\n");
}

#[test]
fn test_probes() {
    let mut map = AddressMap::new();
    map.insert("conf", 0).unwrap();
    assert!(map.test_name("conf", None));
    assert!(map.test_name("conf", Some(0)));
    assert!(!map.test_name("conf", Some(1)));
    assert!(!map.test_name("cntl", None));
    assert!(map.test_address(0));
    assert!(!map.test_address(1));
}

#[cfg(test)]
#[derive(Debug, Arbitrary)]
struct MapPair {
    #[strategy("[a-z][a-z0-9_.]{0,11}")]
    name: String,
    address: u16,
}

#[cfg(test)]
#[proptest]
fn insert_then_find_returns_the_pair(pair: MapPair) {
    let mut map = AddressMap::new();
    map.insert(&pair.name, pair.address).unwrap();
    assert_eq!(map.find_by_name(&pair.name), Some(pair.address));
    assert_eq!(map.find_by_address(pair.address), Some(pair.name.as_str()));
}

#[cfg(test)]
#[proptest]
fn conflicting_insert_does_not_mutate(first: MapPair, second: MapPair) {
    let mut map = AddressMap::new();
    map.insert(&first.name, first.address).unwrap();
    let before = map.enumerate();
    let result = map.insert(&second.name, second.address);
    if second.name == first.name || second.address == first.address {
        assert!(result.is_err());
        assert_eq!(map.enumerate(), before);
    } else {
        assert!(result.is_ok());
        assert_eq!(map.len(), 2);
    }
}
