//! Running the `asm-11` assembler and interpreting its output.
//!
//! The assembler is run with `--ocof=-`, which makes it write the
//! symbol table and the generated code to standard output in a simple
//! block format:
//!
//! ```text
//! sym {
//! start => 001000
//! }
//! dat {
//! w 001000 {
//! 012700 000100
//! }
//! b 001004 {
//! 001 002
//! }
//! }
//! ```
//!
//! Everything outside the `sym {}` and `dat {}` blocks is listing
//! text (with `--olst=-`) or diagnostics.
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{event, Level};

use super::image::CodeImage;
use super::LoadError;

/// What to assemble.
#[derive(Debug, Clone, Copy)]
pub enum AsmInput<'a> {
    /// Source text, fed to the assembler on its standard input.
    Code(&'a str),
    File(&'a Path),
}

/// The raw result of running the assembler: its output lines (standard
/// output followed by standard error) and its exit status.  An exit
/// code of `None` means the assembler was killed by a signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerRun {
    pub lines: Vec<String>,
    pub exit_code: Option<i32>,
}

pub trait Assembler {
    fn run(
        &self,
        input: AsmInput<'_>,
        listing: bool,
        options: &[String],
    ) -> Result<AssemblerRun, LoadError>;
}

/// Runs an external assembler program.
#[derive(Debug, Clone)]
pub struct SubprocessAssembler {
    program: String,
    leading_args: Vec<String>,
}

impl SubprocessAssembler {
    #[must_use]
    pub fn new(program: &str) -> SubprocessAssembler {
        SubprocessAssembler {
            program: program.to_string(),
            leading_args: Vec::new(),
        }
    }

    /// The `asm-11` assembler, found via `PATH`.
    #[must_use]
    pub fn asm11() -> SubprocessAssembler {
        SubprocessAssembler::new("asm-11")
    }

    /// Arguments to pass before the ones the loader generates.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> SubprocessAssembler
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args.extend(args.into_iter().map(Into::into));
        self
    }

    fn arguments(&self, input: AsmInput<'_>, listing: bool, options: &[String]) -> Vec<String> {
        let mut args = self.leading_args.clone();
        if listing {
            args.push("--olst=-".to_string());
        }
        args.push("--ocof=-".to_string());
        args.extend(options.iter().cloned());
        match input {
            AsmInput::Code(_) => args.push("-".to_string()),
            AsmInput::File(path) => args.push(path.display().to_string()),
        }
        args
    }
}

impl Assembler for SubprocessAssembler {
    fn run(
        &self,
        input: AsmInput<'_>,
        listing: bool,
        options: &[String],
    ) -> Result<AssemblerRun, LoadError> {
        let args = self.arguments(input, listing, options);
        event!(Level::DEBUG, "running {} {}", self.program, args.join(" "));
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| LoadError::Spawn {
                program: self.program.clone(),
                error,
            })?;

        let source: String = match input {
            AsmInput::Code(code) => {
                let code = code.strip_prefix('\n').unwrap_or(code);
                code.lines().map(|line| format!("{line}\n")).collect()
            }
            AsmInput::File(_) => String::new(),
        };
        let stdin = child.stdin.take();
        let output = thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // The assembler may exit without reading all of
                    // its input; what it printed is still wanted.
                    if let Err(e) = stdin.write_all(source.as_bytes()) {
                        event!(Level::DEBUG, "assembler did not take its input: {e}");
                    }
                }
            });
            child.wait_with_output()
        })?;

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );
        Ok(AssemblerRun {
            lines,
            exit_code: output.status.code(),
        })
    }
}

/// The interpreted output of an assembler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblerOutput {
    pub listing: Vec<String>,
    /// The listing lines which report problems.
    pub diagnostics: Vec<String>,
    pub symbols: BTreeMap<String, u16>,
    pub image: CodeImage,
    pub exit_code: Option<i32>,
}

impl AssemblerOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    #[must_use]
    pub fn diagnostics_text(&self) -> String {
        self.diagnostics.join("\n")
    }
}

fn parse_octal(text: &str) -> Option<u16> {
    u16::from_str_radix(text.trim(), 8).ok()
}

/// The octal number at the start of `text`, ignoring anything after
/// it.
fn leading_octal(text: &str) -> Option<u16> {
    let end = text
        .find(|c: char| !('0'..='7').contains(&c))
        .unwrap_or(text.len());
    parse_octal(&text[..end])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Listing,
    Symbols,
    Data,
}

/// Decide whether a listing line reports a problem.  Before the
/// input file list every line not starting with `--` does; after it,
/// the lines starting with an upper case letter (the error flags
/// column).  Messages from the assembler itself always do.
fn is_diagnostic(line: &str, after_file_list: bool) -> bool {
    if line.starts_with("asm-11") {
        return true;
    }
    if after_file_list {
        line.chars().next().is_some_and(|c| c.is_ascii_uppercase())
    } else {
        !line.starts_with("--")
    }
}

pub fn parse_assembler_output(run: &AssemblerRun) -> Result<AssemblerOutput, LoadError> {
    let mut output = AssemblerOutput {
        exit_code: run.exit_code,
        ..AssemblerOutput::default()
    };
    let mut section = Section::Listing;
    // Inside `dat {}`: the type of the current data group ('w' or
    // 'b') and the next address.
    let mut group: Option<char> = None;
    let mut dot: u16 = 0;
    let mut after_file_list = false;

    for line in run.lines.iter() {
        if line == "sym {" {
            section = Section::Symbols;
            continue;
        } else if line == "dat {" {
            section = Section::Data;
            continue;
        } else if group.is_none() && line == "}" {
            section = Section::Listing;
            continue;
        }

        match section {
            Section::Symbols => {
                let (name, value) = line
                    .split_once(" => ")
                    .ok_or_else(|| LoadError::BadSymbolLine(line.clone()))?;
                let value = parse_octal(value).ok_or_else(|| LoadError::BadSymbolLine(line.clone()))?;
                output.symbols.insert(name.to_string(), value);
            }
            Section::Data => match group {
                None => {
                    if line.len() != 10 {
                        return Err(LoadError::BadDataLine(line.clone()));
                    }
                    let kind = line.chars().next();
                    dot = line
                        .get(2..)
                        .and_then(leading_octal)
                        .ok_or_else(|| LoadError::BadDataLine(line.clone()))?;
                    group = kind;
                }
                Some(_) if line.starts_with('}') => group = None,
                Some(kind) => {
                    for item in line.split_whitespace() {
                        let value =
                            parse_octal(item).ok_or_else(|| LoadError::BadDataLine(line.clone()))?;
                        if kind == 'w' {
                            output.image.put_word(dot, value);
                            dot = dot.wrapping_add(2);
                        } else {
                            output.image.put_byte(dot, (value & 0xff) as u8);
                            dot = dot.wrapping_add(1);
                        }
                    }
                }
            },
            Section::Listing => {
                if line == "; Input file list:" {
                    after_file_list = true;
                }
                if is_diagnostic(line, after_file_list) {
                    output.diagnostics.push(line.clone());
                }
                output.listing.push(line.clone());
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, exit_code: i32) -> AssemblerRun {
        AssemblerRun {
            lines: text.lines().map(str::to_string).collect(),
            exit_code: Some(exit_code),
        }
    }

    #[test]
    fn test_blocks_are_demultiplexed() {
        let output = parse_assembler_output(&run(
            "; Input file list:\n\
             1 001000 012700 mov #100,r0\n\
             sym {\n\
             start => 001000\n\
             stack => 000776\n\
             }\n\
             dat {\n\
             w 001000 {\n\
             012700 000100\n\
             }\n\
             b 001004 {\n\
             001 002 003\n\
             }\n\
             }\n\
             ; trailer",
            0,
        ))
        .unwrap();
        assert!(output.succeeded());
        assert_eq!(output.symbols.get("start"), Some(&0o1000));
        assert_eq!(output.symbols.get("stack"), Some(&0o776));
        assert_eq!(output.image.get(0o1000), Some(0o12700));
        assert_eq!(output.image.get(0o1002), Some(0o100));
        assert_eq!(output.image.get(0o1004), Some(0o2 << 8 | 0o1));
        assert_eq!(output.image.get(0o1006), Some(0o3));
        assert_eq!(
            output.listing,
            vec![
                "; Input file list:".to_string(),
                "1 001000 012700 mov #100,r0".to_string(),
                "; trailer".to_string()
            ]
        );
        assert!(output.diagnostics.is_empty());
    }

    #[test]
    fn test_diagnostics_selection() {
        let output = parse_assembler_output(&run(
            "-- pass 1\n\
             some message\n\
             ; Input file list:\n\
             E 12 001000 bad operand\n\
             13 001002 ok\n\
             asm-11: 1 error",
            1,
        ))
        .unwrap();
        assert!(!output.succeeded());
        assert_eq!(
            output.diagnostics,
            vec![
                "some message".to_string(),
                "E 12 001000 bad operand".to_string(),
                "asm-11: 1 error".to_string()
            ]
        );
    }

    #[test]
    fn test_bad_blocks() {
        assert!(matches!(
            parse_assembler_output(&run("sym {\nstart = 1000\n}", 0)),
            Err(LoadError::BadSymbolLine(_))
        ));
        assert!(matches!(
            parse_assembler_output(&run("dat {\nw 1000 {\n}\n}", 0)),
            Err(LoadError::BadDataLine(_))
        ));
        assert!(matches!(
            parse_assembler_output(&run("dat {\nw 001000 {\n0128\n}\n}", 0)),
            Err(LoadError::BadDataLine(_))
        ));
    }

    #[test]
    fn test_arguments() {
        let asm = SubprocessAssembler::asm11();
        assert_eq!(
            asm.arguments(AsmInput::Code(""), true, &["-I".to_string(), "x".to_string()]),
            vec!["--olst=-", "--ocof=-", "-I", "x", "-"]
        );
        assert_eq!(
            asm.arguments(AsmInput::File(Path::new("t.mac")), false, &[]),
            vec!["--ocof=-", "t.mac"]
        );
    }

    #[test]
    fn test_subprocess_echo() {
        let asm = SubprocessAssembler::new("sh").with_args(["-c", "cat; echo asm-11: done >&2", "sh"]);
        let result = asm
            .run(AsmInput::Code("\nsym {\nx => 000002\n}\n"), false, &[])
            .unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(
            result.lines,
            vec!["sym {", "x => 000002", "}", "asm-11: done"]
        );
    }

    #[test]
    fn test_missing_program() {
        let asm = SubprocessAssembler::new("/nonexistent/asm-11");
        assert!(matches!(
            asm.run(AsmInput::Code(""), false, &[]),
            Err(LoadError::Spawn { .. })
        ));
    }
}
