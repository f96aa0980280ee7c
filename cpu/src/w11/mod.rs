//! The CPU facade.
//!
//! [`W11Cpu`] turns console operations (start, stop, deposit,
//! examine, boot and so on) into cp batches and executes them on the
//! shared link.  Every operation which changes the run state is sent
//! as a single batch, so it runs under one acquisition of the link
//! lock.  Before a batch which starts the CPU is sent the activity
//! flag is raised; it is lowered again when attention from the CPU
//! arrives (see [`W11Cpu::wait_for_cpu_idle`]).
//!
//! Memory transfers too large for one frame are split over several
//! batches, all sent while the link stays locked.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base::prelude::*;
use rlink::{
    ActivityFlag, AttentionWaiter, BatchError, BatchOutcome, Connection, ExecutionResult,
    LinkGuard, LinkStats, Status, WaitOutcome,
};
use tracing::{event, span, Level};

use super::cntl::{parse_unit_name, Controller, ControllerSummary};
use super::config::CpuConfig;
use super::cp::{AddressMode, CpBatch};
use super::error::CpuError;
use super::loader::{
    parse_assembler_output, read_absolute, AsmInput, Assembler, AssemblerOutput, CodeImage,
    LoadError,
};
use super::regs::{mmu, stat, CpFunction, CP_NAMES, IBUS_NAMES, UBMAP_BASE, UBMAP_WORDS};
use super::snapshot::{CpuSnapshot, MmuSnapshot, Psw, UnibusMap};

/// A block write added to a batch by [`W11Cpu::add_deposit`].
struct PendingWrite {
    index: usize,
    address: PhysAddr,
    words: usize,
}

pub struct W11Cpu {
    connection: Arc<Connection>,
    base: u16,
    ibase: u16,
    lam: u8,
    rmap: AddressMap,
    imap: AddressMap,
    activity: Arc<ActivityFlag>,
    controllers: Vec<Box<dyn Controller>>,
}

impl W11Cpu {
    /// Attach to the CPU described by `config`.  Attention for the
    /// CPU lowers the activity flag whenever the attention server is
    /// running.
    pub fn new(connection: Arc<Connection>, config: &CpuConfig) -> Result<W11Cpu, CpuError> {
        let mut rmap = AddressMap::new();
        for (name, offset) in CP_NAMES {
            rmap.insert(name, config.base.wrapping_add(*offset))?;
        }
        let mut imap = AddressMap::new();
        for (name, address) in IBUS_NAMES {
            imap.insert(name, *address)?;
        }
        let activity = Arc::new(ActivityFlag::new());
        let flag = Arc::clone(&activity);
        connection.add_attention_handler(
            config.lam_mask(),
            Box::new(move |_pattern| flag.set_down()),
        );
        event!(
            Level::DEBUG,
            "w11 cpu at base {:#06x}, ibase {:#06x}, lam {}",
            config.base,
            config.ibase,
            config.lam
        );
        Ok(W11Cpu {
            connection,
            base: config.base,
            ibase: config.ibase,
            lam: config.lam,
            rmap,
            imap,
            activity,
            controllers: Vec::new(),
        })
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    #[must_use]
    pub fn base(&self) -> u16 {
        self.base
    }

    #[must_use]
    pub fn ibase(&self) -> u16 {
        self.ibase
    }

    #[must_use]
    pub fn lam(&self) -> u8 {
        self.lam
    }

    fn lam_mask(&self) -> u16 {
        1u16.checked_shl(u32::from(self.lam)).unwrap_or(0)
    }

    /// True between starting the CPU and attention telling us it
    /// stopped.
    #[must_use]
    pub fn activity_expected(&self) -> bool {
        self.activity.is_up()
    }

    #[must_use]
    pub fn new_batch(&self) -> CpBatch {
        CpBatch::new(
            self.base,
            self.ibase,
            self.connection.config().block_size_max,
        )
    }

    /// Execute `batch`.  When it starts the CPU, the activity flag is
    /// raised before the batch goes out.
    pub fn execute(&self, batch: &mut CpBatch) -> Result<BatchOutcome, CpuError> {
        let mut link = self.connection.lock();
        self.execute_on(&mut link, batch)
    }

    /// Execute `batch` on a link which is already locked.
    fn execute_on(
        &self,
        link: &mut LinkGuard<'_>,
        batch: &mut CpBatch,
    ) -> Result<BatchOutcome, CpuError> {
        if batch.activity_expected() {
            self.activity.set_up();
        }
        Ok(link.execute(batch.batch_mut())?)
    }

    // Run control.

    fn control(&self, function: CpFunction) -> Result<(), CpuError> {
        let mut batch = self.new_batch();
        let index = batch.function(function)?;
        self.execute(&mut batch)?;
        check_control(&batch, index, function.name())?;
        if function == CpFunction::Stop {
            self.activity.set_down();
        }
        Ok(())
    }

    pub fn start(&self) -> Result<(), CpuError> {
        self.control(CpFunction::Start).inspect_err(|_| self.activity.set_down())
    }

    pub fn stop(&self) -> Result<(), CpuError> {
        self.control(CpFunction::Stop)
    }

    pub fn step(&self) -> Result<(), CpuError> {
        self.control(CpFunction::Step)
    }

    pub fn reset_controller(&self) -> Result<(), CpuError> {
        self.control(CpFunction::CpuReset)
    }

    pub fn reset_bus(&self) -> Result<(), CpuError> {
        self.control(CpFunction::BusReset)
    }

    pub fn suspend(&self) -> Result<(), CpuError> {
        self.control(CpFunction::Suspend)
    }

    pub fn resume(&self) -> Result<(), CpuError> {
        self.control(CpFunction::Resume).inspect_err(|_| self.activity.set_down())
    }

    /// Stop and reset the CPU, then start it at `pc`.
    pub fn start_at(&self, pc: u16) -> Result<(), CpuError> {
        let mut batch = self.new_batch();
        let index = batch.stapc(pc)?;
        self.execute(&mut batch)?;
        check_control(&batch, index, "start").inspect_err(|_| self.activity.set_down())
    }

    /// Wait until the CPU stops, for at most `timeout`.  On timeout an
    /// error is counted in the link statistics and, if `reset` is set,
    /// the CPU is stopped.
    pub fn wait_for_cpu_idle(&self, timeout: Duration, reset: bool) -> Result<WaitOutcome, CpuError> {
        let waiter = AttentionWaiter::new(&self.connection, self.lam_mask(), &self.activity);
        let outcome = waiter.wait(timeout)?;
        if let WaitOutcome::TimedOut { .. } = outcome {
            self.connection.note_error();
            event!(
                Level::INFO,
                "-- wtcpu to={} FAIL timeout",
                timeout.as_secs_f64()
            );
            if reset {
                self.stop()?;
            }
        }
        Ok(outcome)
    }

    // Registers.

    pub fn read_register(&self, n: u8) -> Result<u16, CpuError> {
        let mut batch = self.new_batch();
        let index = batch.rr(n)?;
        self.execute(&mut batch)?;
        checked_data(&batch, index)
    }

    pub fn write_register(&self, n: u8, value: u16) -> Result<(), CpuError> {
        let mut batch = self.new_batch();
        let index = batch.wr(n, value)?;
        self.execute(&mut batch)?;
        checked_data(&batch, index).map(|_| ())
    }

    pub fn snapshot(&self, with_registers: bool) -> Result<CpuSnapshot, CpuError> {
        let mut batch = self.new_batch();
        let i_pc = batch.rpc()?;
        let i_psw = batch.rps()?;
        let i_stat = batch.rstat()?;
        let first_register = batch.len();
        if with_registers {
            for n in 0..7 {
                batch.rr(n)?;
            }
        }
        self.execute(&mut batch)?;
        let registers = if with_registers {
            let mut r = [0u16; 7];
            for (n, slot) in r.iter_mut().enumerate() {
                *slot = checked_data(&batch, first_register + n)?;
            }
            Some(r)
        } else {
            None
        };
        Ok(CpuSnapshot {
            pc: checked_data(&batch, i_pc)?,
            psw: Psw {
                bits: checked_data(&batch, i_psw)?,
            },
            stat: checked_data(&batch, i_stat)?,
            registers,
        })
    }

    // Memory.

    /// Add the operations which write `words` at `address` to `batch`:
    /// the latch load and as many blocks as still fit.  Returns the
    /// pending writes and the number of words they cover.
    fn add_deposit(
        batch: &mut CpBatch,
        address: PhysAddr,
        words: &[u16],
    ) -> Result<(Vec<PendingWrite>, usize), CpuError> {
        let block_size = batch.block_size_max();
        batch.wa(address.bits(), AddressMode::P22)?;
        let mut pending = Vec::new();
        let mut at = address;
        let mut consumed = 0;
        for chunk in words.chunks(block_size) {
            if !pending.is_empty() && !batch.has_room_for_block(chunk.len()) {
                break;
            }
            let index = batch.bwm(chunk.to_vec())?;
            batch.edone(chunk.len() as u16)?;
            pending.push(PendingWrite {
                index,
                address: at,
                words: chunk.len(),
            });
            at = at.offset_words(chunk.len() as u32);
            consumed += chunk.len();
        }
        Ok((pending, consumed))
    }

    /// Check the writes of one batch of a deposit of `total` words at
    /// `address`, of which `before` were written by earlier batches.
    fn check_deposit(
        batch: &CpBatch,
        address: PhysAddr,
        total: usize,
        before: usize,
        pending: &[PendingWrite],
    ) -> Result<(), CpuError> {
        let mut written = before;
        for write in pending {
            let result = batch.result(write.index);
            let done = result.and_then(ExecutionResult::done).map_or(0, usize::from);
            let status = result.map_or(Status::OK, ExecutionResult::status);
            written += done;
            if done != write.words || status.is_fault() {
                event!(
                    Level::WARN,
                    "memory write at {} stopped after {done} of {} words",
                    write.address,
                    write.words
                );
                return Err(CpuError::MemoryAccess {
                    address: address.bits(),
                    requested: total,
                    done: written,
                    status,
                });
            }
        }
        Ok(())
    }

    /// Write `words` to memory starting at physical address `address`.
    pub fn deposit(&self, address: u32, words: &[u16]) -> Result<(), CpuError> {
        if words.is_empty() {
            return Ok(());
        }
        let address = word_address(address)?;
        let mut link = self.connection.lock();
        let mut written = 0;
        while written < words.len() {
            let mut batch = self.new_batch();
            let at = address.offset_words(written as u32);
            let (pending, consumed) = W11Cpu::add_deposit(&mut batch, at, &words[written..])?;
            self.execute_on(&mut link, &mut batch)?;
            W11Cpu::check_deposit(&batch, address, words.len(), written, &pending)?;
            written += consumed;
        }
        Ok(())
    }

    /// Read `count` words from memory starting at physical address
    /// `address`.
    pub fn examine(&self, address: u32, count: usize) -> Result<Vec<u16>, CpuError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let address = word_address(address)?;
        let mut link = self.connection.lock();
        let mut words = Vec::with_capacity(count);
        while words.len() < count {
            let mut batch = self.new_batch();
            let block_size = batch.block_size_max();
            let at = address.offset_words(words.len() as u32);
            batch.wa(at.bits(), AddressMode::P22)?;
            let mut reads = Vec::new();
            let mut remaining = count - words.len();
            while remaining > 0 {
                let n = remaining.min(block_size);
                if !reads.is_empty() && !batch.has_room_for_block(n) {
                    break;
                }
                reads.push(batch.brm(n)?);
                remaining -= n;
            }
            self.execute_on(&mut link, &mut batch)?;
            collect_blocks(&batch, &reads, address.bits(), count, &mut words)?;
        }
        Ok(words)
    }

    /// Read the words from `begin` to `end` inclusive.
    pub fn examine_range(&self, begin: u32, end: u32) -> Result<Vec<u16>, CpuError> {
        if end < begin {
            return Err(CpuError::BadAddress(format!(
                "end {end:o} is below begin {begin:o}"
            )));
        }
        let count = 1 + ((end - begin) / 2) as usize;
        self.examine(begin, count)
    }

    /// Read MMR0..MMR3 and the PDR/PAR sets of all modes.
    pub fn mmu_snapshot(&self) -> Result<MmuSnapshot, CpuError> {
        let mut link = self.connection.lock();
        let mut batch = self.new_batch();
        let mmr012 = add_io_read(&mut batch, mmu::MMR0, 3)?;
        let mmr3 = add_io_read(&mut batch, mmu::MMR3, 1)?;
        self.execute_on(&mut link, &mut batch)?;
        let mut words = Vec::with_capacity(4);
        collect_blocks(&batch, &mmr012, u32::from(mmu::MMR0), 3, &mut words)?;
        let mut last = Vec::with_capacity(1);
        collect_blocks(&batch, &mmr3, u32::from(mmu::MMR3), 1, &mut last)?;
        words.extend(last);
        let mut mmr = [0u16; 4];
        mmr.copy_from_slice(&words);

        let bases = [mmu::ASR_KERNEL, mmu::ASR_SUPERVISOR, mmu::ASR_USER];
        let mut batch = self.new_batch();
        let mut reads = Vec::with_capacity(bases.len());
        for base in bases {
            reads.push(add_io_read(&mut batch, base, mmu::ASR_WORDS)?);
        }
        self.execute_on(&mut link, &mut batch)?;
        let mut asr = [[0u16; mmu::ASR_WORDS]; 3];
        for ((slot, base), read) in asr.iter_mut().zip(bases).zip(&reads) {
            let mut words = Vec::with_capacity(mmu::ASR_WORDS);
            collect_blocks(&batch, read, u32::from(base), mmu::ASR_WORDS, &mut words)?;
            slot.copy_from_slice(&words);
        }
        Ok(MmuSnapshot { mmr, asr })
    }

    /// Read the Unibus map registers.
    pub fn ubmap(&self) -> Result<UnibusMap, CpuError> {
        let mut batch = self.new_batch();
        let reads = add_io_read(&mut batch, UBMAP_BASE, UBMAP_WORDS)?;
        self.execute(&mut batch)?;
        let mut words = Vec::with_capacity(UBMAP_WORDS);
        collect_blocks(&batch, &reads, u32::from(UBMAP_BASE), UBMAP_WORDS, &mut words)?;
        Ok(UnibusMap { words })
    }

    // Loading code.

    fn write_image(&self, image: &CodeImage) -> Result<usize, CpuError> {
        let mut written = 0;
        for chunk in image.chunks(self.connection.config().block_size_max) {
            let address = PhysAddr::from_16bit(chunk.address);
            self.deposit(address.bits(), &chunk.words)?;
            written += chunk.words.len();
        }
        Ok(written)
    }

    /// Assemble `input` and load the result.  Nothing is written to
    /// memory unless the assembler succeeds.
    pub fn load_assembly(
        &self,
        assembler: &dyn Assembler,
        input: AsmInput<'_>,
        options: &[String],
        listing: bool,
    ) -> Result<AssemblerOutput, CpuError> {
        let span = span!(Level::DEBUG, "ldasm");
        let _enter = span.enter();
        let run = assembler.run(input, listing, options)?;
        let output = parse_assembler_output(&run)?;
        if !output.succeeded() {
            event!(
                Level::ERROR,
                "assembler failed with {} diagnostics",
                output.diagnostics.len()
            );
            return Err(CpuError::Load(LoadError::AssemblyFailed {
                diagnostics: output.diagnostics_text(),
            }));
        }
        let written = self.write_image(&output.image)?;
        event!(Level::INFO, "loaded {written} words from assembler output");
        Ok(output)
    }

    /// Load a file in absolute loader format and return its start
    /// address, if it has one.
    pub fn load_absolute(&self, path: &Path) -> Result<Option<u16>, CpuError> {
        let loaded = read_absolute(path)?;
        let written = self.write_image(&loaded.image)?;
        event!(
            Level::INFO,
            "loaded {written} words from {}",
            path.display()
        );
        Ok(loaded.start)
    }

    // Controllers.

    pub fn add_controller(&mut self, controller: Box<dyn Controller>) -> Result<(), CpuError> {
        if self.controller(controller.name()).is_ok() {
            return Err(CpuError::ControllerExists(controller.name().to_string()));
        }
        self.controllers.push(controller);
        Ok(())
    }

    pub fn controller(&self, name: &str) -> Result<&dyn Controller, CpuError> {
        self.controllers
            .iter()
            .find(|c| c.name() == name)
            .map(AsRef::as_ref)
            .ok_or_else(|| CpuError::UnknownController(name.to_string()))
    }

    #[must_use]
    pub fn controllers(&self) -> Vec<ControllerSummary> {
        self.controllers
            .iter()
            .map(|c| ControllerSummary::of(c.as_ref()))
            .collect()
    }

    /// Boot from `unit` (for example `rk0`): load the controller's
    /// boot code, put the unit number in R0 and start the CPU at the
    /// boot code's start address.
    pub fn boot(&self, unit: &str) -> Result<(), CpuError> {
        let span = span!(Level::INFO, "boot", unit);
        let _enter = span.enter();
        let (name, number) = parse_unit_name(unit)?;
        let code = self.controller(name)?.boot_code(number)?;
        let unit_register =
            u16::try_from(number).map_err(|_| CpuError::UnknownUnit(unit.to_string()))?;
        let load_address = PhysAddr::from_16bit(code.load_address);

        let mut batch = self.new_batch();
        let (pending, consumed) = W11Cpu::add_deposit(&mut batch, load_address, &code.words)?;
        if consumed != code.words.len() {
            return Err(CpuError::Batch(BatchError::InvalidArgument(format!(
                "boot code of {} words does not fit in one batch",
                code.words.len()
            ))));
        }
        batch.wr(0, unit_register)?;
        let start = batch.stapc(code.start)?;
        self.execute(&mut batch)?;
        W11Cpu::check_deposit(&batch, load_address, code.words.len(), 0, &pending)?;
        check_control(&batch, start, "start").inspect_err(|_| self.activity.set_down())?;
        event!(
            Level::INFO,
            "booting {unit}: {} words at {:06o}, start {:06o}",
            code.words.len(),
            code.load_address,
            code.start
        );
        Ok(())
    }

    // Address maps.

    /// Resolve an rbus address given as a number or as a name in the
    /// CPU's map or the link's common map.
    pub fn rbus_address(&self, name: &str) -> Result<u16, CpuError> {
        if let Ok(address) = parse_u16(name) {
            return Ok(address);
        }
        if let Some(address) = self.rmap.find_by_name(name) {
            return Ok(address);
        }
        self.connection
            .lock()
            .common_map()
            .find_by_name(name)
            .ok_or_else(|| CpuError::UnknownName(name.to_string()))
    }

    /// Resolve an I/O page address given as a number or as a name in
    /// the ibus map.
    pub fn ibus_address(&self, name: &str) -> Result<u16, CpuError> {
        let address = match parse_u16(name) {
            Ok(address) => address,
            Err(_) => self
                .imap
                .find_by_name(name)
                .ok_or_else(|| CpuError::UnknownName(name.to_string()))?,
        };
        super::cp::check_ibus_address(address)
    }

    pub fn rmap_insert(&mut self, name: &str, address: u16) -> Result<(), CpuError> {
        let _link = self.connection.lock();
        Ok(self.rmap.insert(name, address)?)
    }

    pub fn rmap_erase(&mut self, name: &str) -> Result<u16, CpuError> {
        let _link = self.connection.lock();
        Ok(self.rmap.erase_by_name(name)?)
    }

    #[must_use]
    pub fn rmap(&self) -> &AddressMap {
        &self.rmap
    }

    pub fn imap_insert(&mut self, name: &str, address: u16) -> Result<(), CpuError> {
        let address = super::cp::check_ibus_address(address)?;
        let _link = self.connection.lock();
        Ok(self.imap.insert(name, address)?)
    }

    pub fn imap_erase(&mut self, name: &str) -> Result<u16, CpuError> {
        let _link = self.connection.lock();
        Ok(self.imap.erase_by_name(name)?)
    }

    #[must_use]
    pub fn imap(&self) -> &AddressMap {
        &self.imap
    }

    pub fn common_map_insert(&self, name: &str, address: u16) -> Result<(), CpuError> {
        Ok(self.connection.lock().common_map_mut().insert(name, address)?)
    }

    #[must_use]
    pub fn common_map_print(&self) -> String {
        self.connection.lock().common_map().print()
    }

    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.connection.stats()
    }
}

/// Latch the I/O page address `ibaddr` and read `count` words through
/// the incrementing memory port, in blocks the batch accepts.
fn add_io_read(batch: &mut CpBatch, ibaddr: u16, count: usize) -> Result<Vec<usize>, CpuError> {
    batch.wal(ibaddr)?;
    let block_size = batch.block_size_max();
    let mut reads = Vec::new();
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(block_size);
        reads.push(batch.brm(n)?);
        remaining -= n;
    }
    Ok(reads)
}

/// Append the words of the block reads `reads` to `words`.  A short
/// or faulted read ends the transfer of `requested` words from
/// `address`.
fn collect_blocks(
    batch: &CpBatch,
    reads: &[usize],
    address: u32,
    requested: usize,
    words: &mut Vec<u16>,
) -> Result<(), CpuError> {
    for index in reads {
        let result = batch.result(*index);
        let block = result.map_or(&[][..], ExecutionResult::block);
        let wanted = batch.batch()[*index].block_size().unwrap_or(block.len());
        words.extend_from_slice(block);
        let status = result.map_or(Status::OK, ExecutionResult::status);
        if block.len() != wanted || status.is_fault() {
            return Err(CpuError::MemoryAccess {
                address,
                requested,
                done: words.len(),
                status,
            });
        }
    }
    Ok(())
}

fn word_address(address: u32) -> Result<PhysAddr, CpuError> {
    PhysAddr::word(address).map_err(|e| CpuError::BadAddress(e.to_string()))
}

/// The data returned by the operation at `index`, or an error if the
/// operation failed.
fn checked_data(batch: &CpBatch, index: usize) -> Result<u16, CpuError> {
    match batch.result(index) {
        Some(result) if result.passed() => Ok(result.data()),
        result => Err(CpuError::AccessFailed {
            operation: batch.batch()[index].to_string(),
            status: result.map_or(Status::OK, ExecutionResult::status),
        }),
    }
}

fn check_control(batch: &CpBatch, index: usize, function: &'static str) -> Result<(), CpuError> {
    let status = batch.result(index).map_or(Status::OK, ExecutionResult::status);
    if status.has(stat::CMD_ERR) || status.is_fault() {
        event!(Level::WARN, "CPU refused {function} (status {status})");
        Err(CpuError::ControlRejected { function, status })
    } else {
        Ok(())
    }
}

/// Render words read from `begin` as `address : data` lines.
#[must_use]
pub fn format_memory_listing(begin: u32, words: &[u16]) -> String {
    words
        .iter()
        .enumerate()
        .map(|(i, word)| format!("{:06o} : {word:06o}\n", begin + 2 * i as u32))
        .collect()
}
