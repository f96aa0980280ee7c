//! Loading code into target memory.
//!
//! Two sources are supported: the output of the `asm-11` assembler
//! (see [`asm`]) and files in the PDP-11 absolute loader format (see
//! [`lda`]).  Both produce a [`CodeImage`], which the CPU facade
//! writes to memory in contiguous chunks.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;

mod asm;
mod image;
mod lda;

pub use asm::{parse_assembler_output, AsmInput, Assembler, AssemblerOutput, AssemblerRun, SubprocessAssembler};
pub use image::{Chunk, CodeImage};
pub use lda::{parse_absolute, read_absolute, AbsoluteImage};
#[cfg(test)]
pub(crate) use lda::record as absolute_record;

#[derive(Debug)]
pub enum LoadError {
    /// The assembler exited with a non-zero status.  `diagnostics` is
    /// the error text it produced, verbatim.
    AssemblyFailed { diagnostics: String },
    BadSymbolLine(String),
    BadDataLine(String),
    BadAbsoluteFile { offset: usize, reason: String },
    Io(io::Error),
    Spawn { program: String, error: io::Error },
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            LoadError::AssemblyFailed { diagnostics } => {
                write!(f, "asm-11 compilation failed with:\n{diagnostics}")
            }
            LoadError::BadSymbolLine(line) => write!(f, "bad sym line: {line}"),
            LoadError::BadDataLine(line) => write!(f, "bad dat line: {line}"),
            LoadError::BadAbsoluteFile { offset, reason } => {
                write!(f, "bad absolute loader file at byte {offset}: {reason}")
            }
            LoadError::Io(e) => write!(f, "I/O error: {e}"),
            LoadError::Spawn { program, error } => {
                write!(f, "failed to run {program}: {error}")
            }
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Io(e) | LoadError::Spawn { error: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> LoadError {
        LoadError::Io(e)
    }
}
