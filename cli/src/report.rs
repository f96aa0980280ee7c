//! Console output, with pass/fail verdicts in colour when writing to
//! a terminal.
use std::io::{self, Write};

use termcolor::{self, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

pub struct Reporter {
    stream: StandardStream,
}

impl Reporter {
    pub fn new() -> Reporter {
        Reporter {
            stream: StandardStream::stdout(get_colour_choice()),
        }
    }

    pub fn text(&mut self, text: &str) -> Result<(), io::Error> {
        self.stream.write_all(text.as_bytes())
    }

    /// Print `message` preceded by OK (green) or FAIL (red).
    pub fn verdict(&mut self, ok: bool, message: &str) -> Result<(), io::Error> {
        let mut colour = ColorSpec::new();
        colour
            .set_fg(Some(if ok {
                termcolor::Color::Green
            } else {
                termcolor::Color::Red
            }))
            .set_bold(true);
        if let Err(e) = self.stream.set_color(&colour) {
            event!(Level::DEBUG, "failed to select colour {:?}: {}", colour, e);
        }
        write!(self.stream, "{}", if ok { "OK" } else { "FAIL" })?;
        if let Err(e) = self.stream.reset() {
            event!(Level::DEBUG, "failed to reset colour: {}", e);
        }
        writeln!(self.stream, " {message}")
    }
}
