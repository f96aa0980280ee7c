//! Parsing of numbers as they are written in console commands and
//! assembler output.
//!
//! A leading `0` selects octal (as in `0177570`), `0o`, `0x` and `0b`
//! prefixes select octal, hexadecimal and binary, anything else is
//! decimal.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseNumberError {
    Empty,
    InvalidDigit(String),
    TooLarge(String),
}

impl Display for ParseNumberError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ParseNumberError::Empty => f.write_str("empty number"),
            ParseNumberError::InvalidDigit(s) => write!(f, "'{s}' is not a valid number"),
            ParseNumberError::TooLarge(s) => write!(f, "'{s}' is out of range"),
        }
    }
}

impl Error for ParseNumberError {}

fn split_radix(s: &str) -> (u32, &str) {
    let lower = s.get(..2).map(str::to_ascii_lowercase);
    match lower.as_deref() {
        Some("0x") => (16, &s[2..]),
        Some("0o") => (8, &s[2..]),
        Some("0b") => (2, &s[2..]),
        _ if s.len() > 1 && s.starts_with('0') => (8, &s[1..]),
        _ => (10, s),
    }
}

pub fn parse_u32(s: &str) -> Result<u32, ParseNumberError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseNumberError::Empty);
    }
    let (radix, digits) = split_radix(s);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_digit(radix)) {
        return Err(ParseNumberError::InvalidDigit(s.to_string()));
    }
    u32::from_str_radix(digits, radix).map_err(|_| ParseNumberError::TooLarge(s.to_string()))
}

pub fn parse_u16(s: &str) -> Result<u16, ParseNumberError> {
    let value = parse_u32(s)?;
    u16::try_from(value).map_err(|_| ParseNumberError::TooLarge(s.trim().to_string()))
}

#[test]
fn test_radix_selection() {
    assert_eq!(parse_u32("0177570"), Ok(0o177570));
    assert_eq!(parse_u32("0o17777570"), Ok(0o17777570));
    assert_eq!(parse_u32("0xffff"), Ok(0xffff));
    assert_eq!(parse_u32("0b101"), Ok(5));
    assert_eq!(parse_u32("100"), Ok(100));
    assert_eq!(parse_u32("0"), Ok(0));
}

#[test]
fn test_bad_numbers() {
    assert_eq!(parse_u32(""), Err(ParseNumberError::Empty));
    assert!(matches!(parse_u32("089"), Err(ParseNumberError::InvalidDigit(_))));
    assert!(matches!(parse_u32("0x"), Err(ParseNumberError::InvalidDigit(_))));
    assert!(matches!(parse_u32("r0"), Err(ParseNumberError::InvalidDigit(_))));
    assert!(matches!(parse_u16("0x10000"), Err(ParseNumberError::TooLarge(_))));
}
