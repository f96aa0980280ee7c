//! A simulated w11 target.
//!
//! [`SimulatedW11`] is a [`Transport`] which executes request frames
//! against a model of the w11 console port instead of sending them
//! anywhere.  It does not execute PDP-11 instructions: a started CPU
//! simply runs (optionally for a configured time, after which it
//! halts) and a single step advances the PC by one word.  That is
//! enough to exercise everything above the link: register and memory
//! access through the address latch, the ibus window, byte enables,
//! control functions and their refusal, and attention when the CPU
//! stops.
//!
//! Tests can inject faults into the next reply through a
//! [`SimHandle`].
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use base::prelude::{IO_PAGE_16, IO_PAGE_22};
use rlink::codec::{self, Reply, Response};
use rlink::{AttentionSignal, Operation, Status, Transport, TransportError};
use tracing::{event, Level};

use super::config::{CpuConfig, SimConfig};
use super::regs::{
    cpstat, mmu, stat, CpFunction, CPAH_M_22BIT, CPAH_M_ADDR, CPAH_M_UBM22, CP_AH, CP_AL, CP_CNTL,
    CP_CONF, CP_MEM, CP_MEMBE, CP_MEMI, CP_PC, CP_PSW, CP_R0, CP_STAT, IBUS_NAMES, IBUS_WINDOW,
    MEMBE_M_BE, MEMBE_M_STICK, UBMAP_BASE, UBMAP_WORDS,
};
use super::snapshot::RunState;

const PSW_ADDRESS: u16 = 0o177776;
/// The value of the cp conf register.
const CONF_VALUE: u16 = 0o000001;

/// Ways in which the next reply can be damaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Send no reply at all.
    DropReply,
    /// Send only the first half of the reply.
    TruncateReply,
    /// Send the reply with a bad checksum.
    CorruptCrc,
    /// Hold the reply back and send it just ahead of the next one.
    DelayReply,
}

/// Why an access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessError {
    /// Nothing at this rbus address.
    Nak,
    /// The device refused the access.
    Refused,
    /// Non-existent memory (or I/O page register) behind the latch.
    Memory,
}

#[derive(Debug)]
struct SimState {
    base: u16,
    ibase: u16,
    lam: u8,
    memory_size: u32,
    run_time: Option<Duration>,

    registers: [u16; 8],
    psw: u16,
    run_state: RunState,
    go: bool,
    suspended: bool,
    /// Bumped on every start so that a halt timer belonging to an
    /// earlier run does nothing.
    generation: u64,
    cmd_err: bool,
    cmd_merr: bool,

    al: u16,
    ah: u16,
    membe: u16,
    memory: BTreeMap<u32, u16>,
    ibus: BTreeMap<u16, u16>,

    attention_pattern: u16,
    /// Set when attention was raised while executing a request.
    attention_raised: bool,
    latched_abort: u16,
    faults: VecDeque<SimFault>,
}

impl SimState {
    fn new(cpu: &CpuConfig, sim: &SimConfig) -> SimState {
        SimState {
            base: cpu.base,
            ibase: cpu.ibase,
            lam: cpu.lam,
            memory_size: sim.memory_size,
            run_time: sim.run_time(),
            registers: [0; 8],
            psw: 0,
            run_state: RunState::INIT,
            go: false,
            suspended: false,
            generation: 0,
            cmd_err: false,
            cmd_merr: false,
            al: 0,
            ah: 0,
            membe: MEMBE_M_BE,
            memory: BTreeMap::new(),
            ibus: SimState::initial_ibus(),
            attention_pattern: 0,
            attention_raised: false,
            latched_abort: 0,
            faults: VecDeque::new(),
        }
    }

    /// The I/O page registers which exist, all zero.  Besides the
    /// named registers these are the MMU PDR/PAR blocks and the Unibus
    /// map.
    fn initial_ibus() -> BTreeMap<u16, u16> {
        let blocks = [
            (mmu::ASR_KERNEL, mmu::ASR_WORDS),
            (mmu::ASR_SUPERVISOR, mmu::ASR_WORDS),
            (mmu::ASR_USER, mmu::ASR_WORDS),
            (UBMAP_BASE, UBMAP_WORDS),
        ];
        let words = blocks
            .iter()
            .flat_map(|(base, n)| (0..*n as u16).map(move |i| base + 2 * i));
        IBUS_NAMES
            .iter()
            .map(|(_, addr)| *addr)
            .filter(|addr| *addr != PSW_ADDRESS)
            .chain(words)
            .map(|addr| (addr, 0))
            .collect()
    }

    fn target_status(&self) -> u8 {
        let mut bits = 0;
        if self.go {
            bits |= stat::CPU_GO;
        }
        if self.suspended {
            bits |= stat::CPU_SUSP;
        }
        if self.attention_pattern != 0 {
            bits |= Status::ATTN;
        }
        bits
    }

    fn cp_status(&self) -> u16 {
        let mut value = self.run_state.to_stat_bits();
        if self.cmd_err {
            value |= cpstat::CMD_ERR;
        }
        if self.cmd_merr {
            value |= cpstat::CMD_MERR;
        }
        if self.go {
            value |= cpstat::CPU_GO;
        }
        if self.suspended {
            value |= cpstat::CPU_SUSP | cpstat::SUSP_EXT;
        }
        value
    }

    fn raise_attention(&mut self) {
        self.attention_pattern |= 1u16.checked_shl(u32::from(self.lam)).unwrap_or(0);
        self.attention_raised = true;
    }

    /// The CPU stops of its own accord.
    fn halt(&mut self) {
        if self.go {
            self.go = false;
            self.suspended = false;
            self.run_state = RunState::HALTED;
            self.raise_attention();
            event!(Level::DEBUG, "simulated CPU halted at {:06o}", self.registers[7]);
        }
    }

    // The address latch.

    fn latch_address(&self) -> Latched {
        let high = u32::from(self.ah & CPAH_M_ADDR) << 16;
        if self.ah & CPAH_M_22BIT != 0 {
            Latched::Physical(high | u32::from(self.al))
        } else if self.ah & CPAH_M_UBM22 != 0 {
            // The Unibus map is the identity here.
            Latched::Physical((high & 0o600000) | u32::from(self.al))
        } else if self.al >= IO_PAGE_16 {
            Latched::Io(self.al)
        } else {
            Latched::Physical(u32::from(self.al))
        }
    }

    fn increment_latch(&mut self) {
        if self.ah & (CPAH_M_22BIT | CPAH_M_UBM22) != 0 {
            let address = ((u32::from(self.ah & CPAH_M_ADDR) << 16) | u32::from(self.al)) + 2;
            self.al = (address & 0xffff) as u16;
            self.ah = (self.ah & !CPAH_M_ADDR) | ((address >> 16) as u16 & CPAH_M_ADDR);
        } else {
            self.al = self.al.wrapping_add(2);
        }
    }

    fn read_latched(&self) -> Result<u16, AccessError> {
        match self.latch_address() {
            Latched::Io(ibaddr) => self.read_ibus(ibaddr).map_err(|_| AccessError::Memory),
            Latched::Physical(address) if address >= IO_PAGE_22 => self
                .read_ibus(io_page_address(address))
                .map_err(|_| AccessError::Memory),
            Latched::Physical(address) if address >= self.memory_size => Err(AccessError::Memory),
            Latched::Physical(address) => Ok(self.memory.get(&address).copied().unwrap_or(0)),
        }
    }

    fn write_latched(&mut self, data: u16) -> Result<(), AccessError> {
        let be = self.membe & MEMBE_M_BE;
        if self.membe & MEMBE_M_STICK == 0 {
            self.membe = MEMBE_M_BE;
        }
        let merge = |old: u16| match be {
            0b01 => (old & 0xff00) | (data & 0x00ff),
            0b10 => (old & 0x00ff) | (data & 0xff00),
            0b00 => old,
            _ => data,
        };
        match self.latch_address() {
            Latched::Io(ibaddr) => self.write_ibus_merged(ibaddr, merge),
            Latched::Physical(address) if address >= IO_PAGE_22 => {
                self.write_ibus_merged(io_page_address(address), merge)
            }
            Latched::Physical(address) if address >= self.memory_size => Err(AccessError::Memory),
            Latched::Physical(address) => {
                let old = self.memory.get(&address).copied().unwrap_or(0);
                self.memory.insert(address, merge(old));
                Ok(())
            }
        }
        .map_err(|_| AccessError::Memory)
    }

    // The I/O page.

    fn read_ibus(&self, ibaddr: u16) -> Result<u16, AccessError> {
        if ibaddr == PSW_ADDRESS {
            return Ok(self.psw);
        }
        self.ibus.get(&ibaddr).copied().ok_or(AccessError::Refused)
    }

    fn write_ibus(&mut self, ibaddr: u16, data: u16) -> Result<(), AccessError> {
        if ibaddr == PSW_ADDRESS {
            self.psw = data;
            return Ok(());
        }
        match self.ibus.get_mut(&ibaddr) {
            Some(value) => {
                *value = data;
                Ok(())
            }
            None => Err(AccessError::Refused),
        }
    }

    fn write_ibus_merged<F>(&mut self, ibaddr: u16, merge: F) -> Result<(), AccessError>
    where
        F: Fn(u16) -> u16,
    {
        let old = self.read_ibus(ibaddr)?;
        self.write_ibus(ibaddr, merge(old))
    }

    // rbus registers.

    fn cp_register(&self, address: u16) -> Option<u16> {
        let offset = address.wrapping_sub(self.base);
        (offset <= CP_MEMBE).then_some(offset)
    }

    fn window_address(&self, address: u16) -> Option<u16> {
        let offset = address.wrapping_sub(self.ibase);
        (offset < IBUS_WINDOW).then(|| IO_PAGE_16 | (offset << 1))
    }

    fn read_register(&mut self, address: u16) -> Result<u16, AccessError> {
        if let Some(reg) = self.cp_register(address) {
            return match reg {
                CP_CONF => Ok(CONF_VALUE),
                CP_CNTL => Ok(0),
                CP_STAT => Ok(self.cp_status()),
                CP_PSW => Ok(self.psw),
                CP_AL => Ok(self.al),
                CP_AH => Ok(self.ah),
                CP_MEM => self.read_latched(),
                CP_MEMI => {
                    let value = self.read_latched()?;
                    self.increment_latch();
                    Ok(value)
                }
                CP_MEMBE => Ok(self.membe),
                r if (CP_R0..=CP_PC).contains(&r) => Ok(self.registers[usize::from(r - CP_R0)]),
                _ => Err(AccessError::Nak),
            };
        }
        match self.window_address(address) {
            Some(ibaddr) => self.read_ibus(ibaddr),
            None => Err(AccessError::Nak),
        }
    }

    fn write_register(&mut self, address: u16, data: u16) -> Result<(), AccessError> {
        if let Some(reg) = self.cp_register(address) {
            return match reg {
                CP_CNTL => self.function(data),
                CP_PSW => {
                    self.psw = data;
                    Ok(())
                }
                CP_AL => {
                    self.al = data;
                    self.ah = 0;
                    Ok(())
                }
                CP_AH => {
                    self.ah = data;
                    Ok(())
                }
                CP_MEM => self.write_latched(data),
                CP_MEMI => {
                    self.write_latched(data)?;
                    self.increment_latch();
                    Ok(())
                }
                CP_MEMBE => {
                    self.membe = data & (MEMBE_M_BE | MEMBE_M_STICK);
                    Ok(())
                }
                r if (CP_R0..=CP_PC).contains(&r) => {
                    self.registers[usize::from(r - CP_R0)] = data;
                    Ok(())
                }
                _ => Err(AccessError::Refused),
            };
        }
        match self.window_address(address) {
            Some(ibaddr) => self.write_ibus(ibaddr, data),
            None => Err(AccessError::Nak),
        }
    }

    /// Perform a cp function.  Functions which make no sense in the
    /// current run state are refused.
    fn function(&mut self, code: u16) -> Result<(), AccessError> {
        let function = CpFunction::from_code(code).ok_or(AccessError::Refused)?;
        match function {
            CpFunction::Noop => (),
            CpFunction::Start => {
                if self.go {
                    return Err(AccessError::Refused);
                }
                self.go = true;
                self.suspended = false;
                self.run_state = RunState::RUNNING;
                self.generation += 1;
            }
            CpFunction::Stop => {
                if self.go {
                    self.go = false;
                    self.suspended = false;
                    self.raise_attention();
                }
                self.run_state = RunState::STOPPED;
            }
            CpFunction::Step => {
                if self.go {
                    return Err(AccessError::Refused);
                }
                self.registers[7] = self.registers[7].wrapping_add(2);
                self.run_state = RunState::STEPPED;
                self.raise_attention();
            }
            CpFunction::CpuReset => {
                if self.go {
                    return Err(AccessError::Refused);
                }
                self.psw = 0;
                self.run_state = RunState::RESET;
            }
            CpFunction::BusReset => {
                self.ibus = SimState::initial_ibus();
            }
            CpFunction::Suspend => {
                if !self.go {
                    return Err(AccessError::Refused);
                }
                self.suspended = true;
                self.run_state = RunState::SUSPENDED;
            }
            CpFunction::Resume => {
                if !self.suspended {
                    return Err(AccessError::Refused);
                }
                self.suspended = false;
                self.run_state = RunState::RUNNING;
            }
        }
        event!(Level::TRACE, "simulated CPU performed {}", function.name());
        Ok(())
    }

    fn is_memory_port(&self, address: u16) -> bool {
        matches!(self.cp_register(address), Some(CP_MEM | CP_MEMI))
    }

    /// Execute one operation and build its reply.
    fn execute(&mut self, position: usize, op: &Operation) -> Reply {
        let mut flags = 0u8;
        let response = match op {
            Operation::RegisterRead { address } => {
                let value = self.read_register(*address);
                flags |= error_flags(value.map(|_| ()));
                if self.is_memory_port(*address) {
                    self.cmd_merr = value.is_err();
                }
                Response::Data(value.unwrap_or(0))
            }
            Operation::RegisterWrite { address, data } => {
                let result = self.write_register(*address, *data);
                if self.cp_register(*address) == Some(CP_CNTL) {
                    flags |= self.note_function(result);
                } else {
                    flags |= error_flags(result);
                    if self.is_memory_port(*address) {
                        self.cmd_merr = result.is_err();
                    }
                }
                Response::Ack
            }
            Operation::ControlFunction { address, function } => {
                if self.cp_register(*address) == Some(CP_CNTL) {
                    let result = self.function(*function);
                    flags |= self.note_function(result);
                } else {
                    flags |= Status::NAK;
                }
                Response::Ack
            }
            Operation::BlockRead { address, count } => {
                let requested = usize::from(*count);
                let mut words = Vec::with_capacity(requested);
                for _ in 0..requested {
                    match self.read_register(*address) {
                        Ok(word) => words.push(word),
                        Err(e) => {
                            flags |= error_flags(Err(e));
                            break;
                        }
                    }
                }
                let done = words.len() as u16;
                if done != *count {
                    self.latched_abort = 1;
                }
                if self.is_memory_port(*address) {
                    self.cmd_merr = done != *count;
                }
                words.resize(requested, 0);
                Response::Block { words, done }
            }
            Operation::BlockWrite { address, words } => {
                let mut done = 0u16;
                for word in words {
                    match self.write_register(*address, *word) {
                        Ok(()) => done += 1,
                        Err(e) => {
                            flags |= error_flags(Err(e));
                            break;
                        }
                    }
                }
                let short = usize::from(done) != words.len();
                if short {
                    self.latched_abort = 1;
                }
                if self.is_memory_port(*address) {
                    self.cmd_merr = short;
                }
                Response::Written { done }
            }
            Operation::LatchedReadback => Response::Data(self.latched_abort),
            Operation::AttentionQuery => {
                let pattern = self.attention_pattern;
                self.attention_pattern = 0;
                Response::Data(pattern)
            }
        };
        Reply::to(
            position,
            op,
            response,
            Status::new(flags | self.target_status()),
        )
    }

    /// Record the outcome of a cp function; returns the status flags
    /// to report.
    fn note_function(&mut self, result: Result<(), AccessError>) -> u8 {
        self.cmd_err = result.is_err();
        if result.is_err() {
            stat::CMD_ERR
        } else {
            0
        }
    }
}

/// What the address latch points at.
#[derive(Debug, Clone, Copy)]
enum Latched {
    Physical(u32),
    /// A 16-bit address in the I/O page.
    Io(u16),
}

fn error_flags(result: Result<(), AccessError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(AccessError::Nak) => Status::NAK,
        Err(AccessError::Refused) => Status::ERR,
        Err(AccessError::Memory) => stat::CMD_MERR,
    }
}

fn io_page_address(physical: u32) -> u16 {
    IO_PAGE_16 | (physical & 0o17777) as u16
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test access to the state of a [`SimulatedW11`].
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    attention: Arc<AttentionSignal>,
}

impl SimHandle {
    /// The memory word at physical address `address`.
    #[must_use]
    pub fn memory(&self, address: u32) -> u16 {
        lock(&self.state)
            .memory
            .get(&(address & !1))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_memory(&self, address: u32, words: &[u16]) {
        let mut state = lock(&self.state);
        for (i, word) in words.iter().enumerate() {
            state.memory.insert((address & !1) + 2 * i as u32, *word);
        }
    }

    #[must_use]
    pub fn register(&self, n: usize) -> u16 {
        lock(&self.state).registers[n & 7]
    }

    #[must_use]
    pub fn run_state(&self) -> RunState {
        lock(&self.state).run_state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.state).go
    }

    /// Damage the next reply.  Faults queue up, one per reply.
    pub fn inject_fault(&self, fault: SimFault) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Make a running CPU halt now.
    pub fn halt(&self) {
        let mut state = lock(&self.state);
        if state.go {
            state.halt();
            drop(state);
            self.attention.notify();
        }
    }

    /// Raise attention for the sources in `pattern`.
    pub fn raise_attention(&self, pattern: u16) {
        lock(&self.state).attention_pattern |= pattern;
        self.attention.notify();
    }
}

pub struct SimulatedW11 {
    state: Arc<Mutex<SimState>>,
    attention: Arc<AttentionSignal>,
    pending: Option<Vec<u8>>,
    /// A reply held back by [`SimFault::DelayReply`].
    late: Option<Vec<u8>>,
}

impl SimulatedW11 {
    #[must_use]
    pub fn new(cpu: &CpuConfig, sim: &SimConfig) -> SimulatedW11 {
        SimulatedW11 {
            state: Arc::new(Mutex::new(SimState::new(cpu, sim))),
            attention: Arc::new(AttentionSignal::new()),
            pending: None,
            late: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
            attention: Arc::clone(&self.attention),
        }
    }

    fn schedule_halt(&self, generation: u64, after: Duration) {
        let state = Arc::clone(&self.state);
        let attention = Arc::clone(&self.attention);
        let spawned = thread::Builder::new()
            .name("sim-halt-timer".to_string())
            .spawn(move || {
                thread::sleep(after);
                let mut state = lock(&state);
                if state.go && state.generation == generation {
                    state.halt();
                    drop(state);
                    attention.notify();
                }
            });
        if let Err(e) = spawned {
            event!(Level::ERROR, "failed to start the halt timer: {e}");
        }
    }
}

impl Transport for SimulatedW11 {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let (tag, ops) = codec::decode_request(frame).map_err(|e| {
            TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })?;
        let mut state = lock(&self.state);
        let generation = state.generation;
        state.latched_abort = 0;
        state.attention_raised = false;
        let replies: Vec<Reply> = ops
            .iter()
            .enumerate()
            .map(|(position, op)| state.execute(position, op))
            .collect();
        let mut reply = codec::encode_reply(tag, &replies).map_err(|e| {
            TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })?;
        let outgoing = match state.faults.pop_front() {
            None => Some(reply),
            Some(SimFault::DropReply) => {
                event!(Level::DEBUG, "simulated target drops its reply");
                None
            }
            Some(SimFault::TruncateReply) => {
                reply.truncate(reply.len() / 2);
                Some(reply)
            }
            Some(SimFault::CorruptCrc) => {
                if let Some(last) = reply.last_mut() {
                    *last ^= 0xff;
                }
                Some(reply)
            }
            Some(SimFault::DelayReply) => {
                event!(Level::DEBUG, "simulated target holds back its reply");
                self.late = Some(reply);
                None
            }
        };
        self.pending = outgoing.map(|reply| match self.late.take() {
            Some(mut late) => {
                late.extend_from_slice(&reply);
                late
            }
            None => reply,
        });
        let started = state.go && state.generation != generation;
        let run_time = state.run_time;
        let new_attention = state.attention_raised;
        let generation = state.generation;
        drop(state);

        if started {
            if let Some(after) = run_time {
                self.schedule_halt(generation, after);
            }
        }
        if new_attention {
            self.attention.notify();
        }
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.pending.take().ok_or(TransportError::TimedOut)
    }

    fn attention(&self) -> Arc<AttentionSignal> {
        Arc::clone(&self.attention)
    }

    fn describe(&self) -> String {
        "simulated w11".to_string()
    }
}
