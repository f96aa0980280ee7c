//! `w11ctl` runs one console command against a w11 CPU, either over
//! a TCP link or against the built-in simulated target.
#![deny(unsafe_code)]

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgAction::{Set, SetTrue};
use clap::{Parser, Subcommand};
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use cpu::loader::{AsmInput, SubprocessAssembler};
use cpu::{
    format_controller_table, format_memory_listing, ConfigError, CpBatch, CpuError,
    SimulatedW11, SystemConfig, W11Cpu,
};
use rlink::{AttentionServer, Connection, LinkError, TcpTransport, Transport, TransportError};

mod cplist;
mod report;

use cplist::CpListError;
use report::Reporter;

/// Control a w11 CPU over an rlink connection
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[clap(action = Set, short = 'c', long)]
    config: Option<PathBuf>,

    /// Address (host:port) of the target.  Without this, a simulated
    /// target is used.
    #[clap(action = Set, long)]
    connect: Option<String>,

    /// Deliver attention through the attention server instead of
    /// polling for it.
    #[clap(action = SetTrue, long)]
    server: bool,

    /// Print the link statistics when done.
    #[clap(action = SetTrue, long)]
    stats: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read memory words
    Examine {
        #[clap(action = Set, value_parser = parse_u32)]
        address: u32,
        #[clap(action = Set, default_value_t = 1)]
        count: usize,
    },
    /// Write memory words
    Deposit {
        #[clap(action = Set, value_parser = parse_u32)]
        address: u32,
        #[clap(required = true, value_parser = parse_u16)]
        words: Vec<u16>,
    },
    /// List memory from BEGIN to END inclusive
    Lsmem {
        #[clap(action = Set, value_parser = parse_u32)]
        begin: u32,
        #[clap(action = Set, value_parser = parse_u32)]
        end: u32,
    },
    /// Read an rbus register, given by name or address
    Rreg {
        #[clap(action = Set)]
        name: String,
    },
    /// Write an rbus register, given by name or address
    Wreg {
        #[clap(action = Set)]
        name: String,
        #[clap(action = Set, value_parser = parse_u16)]
        value: u16,
    },
    /// Read an I/O page register, given by name or address
    Ribr {
        #[clap(action = Set)]
        name: String,
    },
    /// Write an I/O page register, given by name or address
    Wibr {
        #[clap(action = Set)]
        name: String,
        #[clap(action = Set, value_parser = parse_u16)]
        value: u16,
    },
    /// Start the CPU, optionally after a reset at a new PC
    Start {
        #[clap(action = Set, long, value_parser = parse_u16)]
        pc: Option<u16>,
    },
    Stop,
    Step,
    /// Reset the CPU
    Reset,
    /// Wait for the CPU to stop
    Wtcpu {
        /// Timeout in seconds
        #[clap(action = Set)]
        timeout: f64,
        /// Stop the CPU if it is still running at the timeout
        #[clap(action = SetTrue, long)]
        reset: bool,
    },
    /// Assemble a file with asm-11 and load the result
    Ldasm {
        #[clap(action = Set)]
        file: PathBuf,
        /// Print the assembler listing
        #[clap(action = SetTrue, long)]
        lst: bool,
        /// Print the symbol table
        #[clap(action = SetTrue, long)]
        sym: bool,
        #[clap(action = Set, long, default_value = "asm-11")]
        assembler: String,
        /// Options passed on to the assembler
        #[clap(last = true)]
        options: Vec<String>,
    },
    /// Load a file in absolute loader format
    Ldabs {
        #[clap(action = Set)]
        file: PathBuf,
        /// Start the CPU at the file's start address
        #[clap(action = SetTrue, long)]
        start: bool,
    },
    /// Boot from a unit of a configured controller, e.g. rk0
    Boot {
        #[clap(action = Set)]
        unit: String,
    },
    /// Show PC, PS and run state
    Show {
        /// Include the general registers
        #[clap(action = SetTrue, short = 'r', long)]
        registers: bool,
        /// Show the memory management registers instead
        #[clap(action = SetTrue, long, conflicts_with_all = ["registers", "ubmap"])]
        mmu: bool,
        /// Show the Unibus map instead
        #[clap(action = SetTrue, long, conflicts_with = "registers")]
        ubmap: bool,
    },
    /// Execute a list of cp items as one batch and print the results,
    /// e.g. `cp -- -wal 0177570 -rm -edata 0`
    Cp {
        #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        items: Vec<String>,
    },
    /// List the configured controllers
    Cntl,
    /// List the address maps
    Maps,
}

#[derive(Debug)]
enum Fail {
    Config(ConfigError),
    Cpu(CpuError),
    CpList(CpListError),
    Link(LinkError),
    Transport(TransportError),
    Output(io::Error),
    WaitTimedOut(Duration),
    InitialisationFailure(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::Config(e) => e.fmt(f),
            Fail::Cpu(e) => e.fmt(f),
            Fail::CpList(e) => e.fmt(f),
            Fail::Link(e) => e.fmt(f),
            Fail::Transport(e) => write!(f, "failed to connect: {e}"),
            Fail::Output(e) => write!(f, "failed to write output: {e}"),
            Fail::WaitTimedOut(t) => write!(f, "CPU still running after {:.3}s", t.as_secs_f64()),
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl Error for Fail {}

impl From<CpuError> for Fail {
    fn from(e: CpuError) -> Fail {
        Fail::Cpu(e)
    }
}

impl From<CpListError> for Fail {
    fn from(e: CpListError) -> Fail {
        Fail::CpList(e)
    }
}

impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Fail {
        Fail::Output(e)
    }
}

fn read_config(cli: &Cli) -> Result<SystemConfig, Fail> {
    match &cli.config {
        Some(path) => SystemConfig::load(path).map_err(Fail::Config),
        None => Ok(SystemConfig::default()),
    }
}

fn attach(cli: &Cli, config: &SystemConfig) -> Result<W11Cpu, Fail> {
    let transport: Box<dyn Transport> = match &cli.connect {
        Some(address) => {
            Box::new(TcpTransport::connect(address.as_str()).map_err(Fail::Transport)?)
        }
        None => Box::new(SimulatedW11::new(&config.cpu, &config.sim)),
    };
    let connection = Arc::new(Connection::new(transport, config.link.clone()));
    let mut cpu = W11Cpu::new(connection, &config.cpu)?;
    for cntl in &config.controller {
        cpu.add_controller(Box::new(cntl.build()))?;
    }
    Ok(cpu)
}

fn execute_command(cpu: &W11Cpu, command: &Command, out: &mut Reporter) -> Result<(), Fail> {
    match command {
        Command::Examine { address, count } => {
            let words = cpu.examine(*address, *count)?;
            out.text(&format_memory_listing(*address, &words))?;
        }
        Command::Deposit { address, words } => {
            cpu.deposit(*address, words)?;
            out.verdict(true, &format!("{} words written", words.len()))?;
        }
        Command::Lsmem { begin, end } => {
            let words = cpu.examine_range(*begin, *end)?;
            out.text(&format_memory_listing(*begin, &words))?;
        }
        Command::Rreg { name } => {
            let address = cpu.rbus_address(name)?;
            let mut batch = cpu.new_batch();
            let index = batch.rreg(address)?;
            cpu.execute(&mut batch)?;
            report_register(out, &batch, index, name)?;
        }
        Command::Wreg { name, value } => {
            let address = cpu.rbus_address(name)?;
            let mut batch = cpu.new_batch();
            let index = batch.wreg(address, *value)?;
            cpu.execute(&mut batch)?;
            report_register(out, &batch, index, name)?;
        }
        Command::Ribr { name } => {
            let address = cpu.ibus_address(name)?;
            let mut batch = cpu.new_batch();
            let index = batch.ribr(address)?;
            cpu.execute(&mut batch)?;
            report_register(out, &batch, index, name)?;
        }
        Command::Wibr { name, value } => {
            let address = cpu.ibus_address(name)?;
            let mut batch = cpu.new_batch();
            let index = batch.wibr(address, *value)?;
            cpu.execute(&mut batch)?;
            report_register(out, &batch, index, name)?;
        }
        Command::Start { pc: Some(pc) } => cpu.start_at(*pc)?,
        Command::Start { pc: None } => cpu.start()?,
        Command::Stop => cpu.stop()?,
        Command::Step => cpu.step()?,
        Command::Reset => cpu.reset_controller()?,
        Command::Wtcpu { timeout, reset } => {
            let timeout = Duration::try_from_secs_f64(*timeout).map_err(|e| {
                Fail::InitialisationFailure(format!("bad timeout {timeout}: {e}"))
            })?;
            let outcome = cpu.wait_for_cpu_idle(timeout, *reset)?;
            if !outcome.is_signaled() {
                out.verdict(false, "wtcpu timeout")?;
                return Err(Fail::WaitTimedOut(timeout));
            }
            out.verdict(
                true,
                &format!("CPU stopped after {:.3}s", outcome.elapsed().as_secs_f64()),
            )?;
        }
        Command::Ldasm {
            file,
            lst,
            sym,
            assembler,
            options,
        } => {
            let span = span!(Level::ERROR, "ldasm", file = ?file);
            let _enter = span.enter();
            let asm = SubprocessAssembler::new(assembler);
            let output = cpu.load_assembly(&asm, AsmInput::File(file), options, *lst)?;
            if *lst {
                for line in &output.listing {
                    out.text(&format!("{line}\n"))?;
                }
            }
            if *sym {
                for (name, value) in &output.symbols {
                    out.text(&format!("{name:<12} {value:06o}\n"))?;
                }
            }
            out.verdict(true, &format!("loaded {} words", output.image.len()))?;
        }
        Command::Ldabs { file, start } => {
            let start_address = cpu.load_absolute(file)?;
            match (start_address, start) {
                (Some(pc), true) => {
                    cpu.start_at(pc)?;
                    out.verdict(true, &format!("started at {pc:06o}"))?;
                }
                (None, true) => {
                    event!(Level::WARN, "{} has no start address", file.display());
                }
                (Some(pc), false) => out.text(&format!("start address {pc:06o}\n"))?,
                (None, false) => (),
            }
        }
        Command::Boot { unit } => {
            cpu.boot(unit)?;
            out.verdict(true, &format!("booted {unit}"))?;
        }
        Command::Show { mmu: true, .. } => out.text(&cpu.mmu_snapshot()?.to_string())?,
        Command::Show { ubmap: true, .. } => out.text(&cpu.ubmap()?.to_string())?,
        Command::Show { registers, .. } => {
            out.text(&cpu.snapshot(*registers)?.to_string())?;
        }
        Command::Cp { items } => {
            let mut batch = cpu.new_batch();
            cplist::add_items(cpu, &mut batch, items)?;
            let outcome = cpu.execute(&mut batch)?;
            out.text(&batch.batch().to_string())?;
            out.verdict(outcome.all_passed(), &outcome.to_string())?;
        }
        Command::Cntl => out.text(&format_controller_table(&cpu.controllers()))?,
        Command::Maps => {
            out.text("rbus:\n")?;
            out.text(&cpu.rmap().print())?;
            out.text(&cpu.common_map_print())?;
            out.text("ibus:\n")?;
            out.text(&cpu.imap().print())?;
        }
    }
    Ok(())
}

fn report_register(
    out: &mut Reporter,
    batch: &CpBatch,
    index: usize,
    name: &str,
) -> Result<(), Fail> {
    match batch.result(index) {
        Some(result) => {
            let message = format!("{name}: {:06o} (status {})", result.data(), result.status());
            out.verdict(result.passed(), &message)?;
        }
        None => out.verdict(false, &format!("{name}: no reply"))?,
    }
    Ok(())
}

fn run_console() -> Result<(), Fail> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let config = read_config(&cli)?;
    let cpu = attach(&cli, &config)?;
    let mut server = if cli.server {
        Some(AttentionServer::start(Arc::clone(cpu.connection())).map_err(Fail::Link)?)
    } else {
        None
    };

    let mut out = Reporter::new();
    let result = execute_command(&cpu, &cli.command, &mut out);
    if let Some(server) = server.as_mut() {
        server.stop();
    }
    if cli.stats {
        match toml::to_string(&cpu.stats()) {
            Ok(text) => out.text(&text)?,
            Err(e) => event!(Level::ERROR, "failed to format statistics: {e}"),
        }
    }
    result
}

fn main() {
    match run_console() {
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
