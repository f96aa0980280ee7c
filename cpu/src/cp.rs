//! Building batches of console port operations.
//!
//! [`CpBatch`] wraps a [`CommandBatch`] and knows where the cp
//! registers of one CPU live, so that callers can write
//! `batch.wa(0o17777570, AddressMode::P22)?; batch.rm()?;` instead of
//! working out rbus addresses themselves.  Every method returns the
//! index of the operation it added (for the paired operations, the
//! index of the memory access).
//!
//! The batch does not check that dependent operations are ordered
//! correctly: the address latch must be written (`wal`, `wa`) before
//! `rm`/`wm` and friends use it.  `rma` and `wma` emit the latch write
//! and the access together.
use rlink::{CommandBatch, ExecutionResult, ExpectationRecord, Status};

use super::error::CpuError;
use super::regs::{
    ibus_window_address, stat, CpFunction, CPAH_M_22BIT, CPAH_M_UBM22, CP_AH, CP_AL, CP_CNTL,
    CP_CONF, CP_MEM, CP_MEMBE, CP_MEMI, CP_PC, CP_PSW, CP_R0, CP_SP, CP_STAT, MEMBE_M_BE,
    MEMBE_M_STICK,
};

/// How `wa` interprets its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    /// A 16-bit address, translated by the CPU's memory management.
    #[default]
    Plain,
    /// A 22-bit physical address.
    P22,
    /// An 18-bit Unibus address, translated by the Unibus map.
    Ubm22,
}

impl AddressMode {
    const fn limit(self) -> u32 {
        match self {
            AddressMode::Plain => 0o177776,
            AddressMode::P22 => 0o17777776,
            AddressMode::Ubm22 => 0o777776,
        }
    }
}

/// Check that `ibaddr` is usable as an address-latch or ibus value.
pub fn check_ibus_address(ibaddr: u16) -> Result<u16, CpuError> {
    if ibaddr & 1 == 0 {
        Ok(ibaddr)
    } else {
        Err(CpuError::BadAddress(format!(
            "{ibaddr:06o} is an odd address"
        )))
    }
}

#[derive(Debug, Clone)]
pub struct CpBatch {
    batch: CommandBatch,
    base: u16,
    ibase: u16,
    activity_expected: bool,
}

impl CpBatch {
    #[must_use]
    pub fn new(base: u16, ibase: u16, block_size_max: usize) -> CpBatch {
        CpBatch {
            batch: CommandBatch::new(block_size_max),
            base,
            ibase,
            activity_expected: false,
        }
    }

    /// True when the batch contains an operation (start, resume or
    /// stapc) after which the CPU is expected to be running.
    #[must_use]
    pub fn activity_expected(&self) -> bool {
        self.activity_expected
    }

    #[must_use]
    pub fn batch(&self) -> &CommandBatch {
        &self.batch
    }

    pub fn batch_mut(&mut self) -> &mut CommandBatch {
        &mut self.batch
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    #[must_use]
    pub fn block_size_max(&self) -> usize {
        self.batch.block_size_max()
    }

    /// Whether a block transfer of `words` words still fits.
    #[must_use]
    pub fn has_room_for_block(&self, words: usize) -> bool {
        self.batch.has_room_for_block(words)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    #[must_use]
    pub fn result(&self, index: usize) -> Option<&ExecutionResult> {
        self.batch.result(index)
    }

    /// The data word returned for the operation at `index`, or zero if
    /// it has not been executed.
    #[must_use]
    pub fn data(&self, index: usize) -> u16 {
        self.batch.result(index).map_or(0, ExecutionResult::data)
    }

    pub fn clear(&mut self) {
        self.batch.clear();
        self.activity_expected = false;
    }

    fn cp(&self, register: u16) -> u16 {
        self.base.wrapping_add(register)
    }

    // Plain link operations.

    pub fn rreg(&mut self, address: u16) -> Result<usize, CpuError> {
        Ok(self.batch.add_register_read(address)?)
    }

    pub fn wreg(&mut self, address: u16, data: u16) -> Result<usize, CpuError> {
        Ok(self.batch.add_register_write(address, data)?)
    }

    pub fn rblk(&mut self, address: u16, count: usize) -> Result<usize, CpuError> {
        Ok(self.batch.add_block_read(address, count)?)
    }

    pub fn wblk(&mut self, address: u16, words: Vec<u16>) -> Result<usize, CpuError> {
        Ok(self.batch.add_block_write(address, words)?)
    }

    pub fn labo(&mut self) -> Result<usize, CpuError> {
        Ok(self.batch.add_latched_readback()?)
    }

    pub fn attn(&mut self) -> Result<usize, CpuError> {
        Ok(self.batch.add_attention_query()?)
    }

    pub fn init(&mut self, address: u16, function: u16) -> Result<usize, CpuError> {
        Ok(self.batch.add_control_function(address, function)?)
    }

    // General registers and PSW.

    fn register(n: u8) -> Result<u16, CpuError> {
        if n < 8 {
            Ok(CP_R0 + u16::from(n))
        } else {
            Err(CpuError::BadRegister(n))
        }
    }

    pub fn rr(&mut self, n: u8) -> Result<usize, CpuError> {
        let reg = CpBatch::register(n)?;
        self.rreg(self.cp(reg))
    }

    pub fn wr(&mut self, n: u8, data: u16) -> Result<usize, CpuError> {
        let reg = CpBatch::register(n)?;
        self.wreg(self.cp(reg), data)
    }

    pub fn rsp(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_SP))
    }

    pub fn rpc(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_PC))
    }

    pub fn wsp(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_SP), data)
    }

    pub fn wpc(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_PC), data)
    }

    pub fn rps(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_PSW))
    }

    pub fn wps(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_PSW), data)
    }

    // The address latch.

    pub fn ral(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_AL))
    }

    pub fn rah(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_AH))
    }

    pub fn wal(&mut self, ibaddr: u16) -> Result<usize, CpuError> {
        let ibaddr = check_ibus_address(ibaddr)?;
        self.wreg(self.cp(CP_AL), ibaddr)
    }

    pub fn wah(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_AH), data)
    }

    /// Load the address latch.  AH is only written when it is
    /// non-zero, so a plain address is equivalent to `wal`.
    pub fn wa(&mut self, address: u32, mode: AddressMode) -> Result<usize, CpuError> {
        if address > mode.limit() {
            return Err(CpuError::BadAddress(format!(
                "{address:o} is out of range 0...{:o}",
                mode.limit()
            )));
        }
        if address & 1 != 0 {
            return Err(CpuError::BadAddress(format!(
                "{address:o} is an odd address"
            )));
        }
        let al = (address & 0xffff) as u16;
        let mut ah = (address >> 16) as u16;
        match mode {
            AddressMode::Plain => (),
            AddressMode::P22 => ah |= CPAH_M_22BIT,
            AddressMode::Ubm22 => ah |= CPAH_M_UBM22,
        }
        let index = self.wreg(self.cp(CP_AL), al)?;
        if ah != 0 {
            self.wreg(self.cp(CP_AH), ah)
        } else {
            Ok(index)
        }
    }

    // Memory access through the latch.

    pub fn rm(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_MEM))
    }

    pub fn rmi(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_MEMI))
    }

    pub fn wm(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_MEM), data)
    }

    pub fn wmi(&mut self, data: u16) -> Result<usize, CpuError> {
        self.wreg(self.cp(CP_MEMI), data)
    }

    /// Latch `ibaddr` and read through it.
    pub fn rma(&mut self, ibaddr: u16) -> Result<usize, CpuError> {
        self.wal(ibaddr)?;
        self.rmi()
    }

    /// Latch `ibaddr` and write `data` through it.
    pub fn wma(&mut self, ibaddr: u16, data: u16) -> Result<usize, CpuError> {
        self.wal(ibaddr)?;
        self.wmi(data)
    }

    /// Block read from consecutive addresses, starting at the latch.
    pub fn brm(&mut self, count: usize) -> Result<usize, CpuError> {
        self.rblk(self.cp(CP_MEMI), count)
    }

    pub fn bwm(&mut self, words: Vec<u16>) -> Result<usize, CpuError> {
        self.wblk(self.cp(CP_MEMI), words)
    }

    /// Block read repeatedly from the latched address.
    pub fn brf(&mut self, count: usize) -> Result<usize, CpuError> {
        self.rblk(self.cp(CP_MEM), count)
    }

    pub fn bwf(&mut self, words: Vec<u16>) -> Result<usize, CpuError> {
        self.wblk(self.cp(CP_MEM), words)
    }

    // Run control.

    /// Issue a cp function as a control operation on the cntl
    /// register.
    pub fn function(&mut self, function: CpFunction) -> Result<usize, CpuError> {
        let index = self.init(self.cp(CP_CNTL), function.code())?;
        if matches!(function, CpFunction::Start | CpFunction::Resume) {
            self.activity_expected = true;
        }
        Ok(index)
    }

    pub fn start(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::Start)
    }

    pub fn stop(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::Stop)
    }

    pub fn step(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::Step)
    }

    pub fn creset(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::CpuReset)
    }

    pub fn breset(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::BusReset)
    }

    pub fn suspend(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::Suspend)
    }

    pub fn resume(&mut self) -> Result<usize, CpuError> {
        self.function(CpFunction::Resume)
    }

    /// Stop, reset, load PC and start.  Returns the index of the
    /// start.
    pub fn stapc(&mut self, pc: u16) -> Result<usize, CpuError> {
        self.stop()?;
        self.creset()?;
        self.wpc(pc)?;
        self.start()
    }

    // Byte enables.

    pub fn rmembe(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_MEMBE))
    }

    /// Set the byte enables for memory writes.  Unless `stick` is set
    /// they revert to both bytes after the next write.
    pub fn wmembe(&mut self, be: u16, stick: bool) -> Result<usize, CpuError> {
        if be > MEMBE_M_BE {
            return Err(CpuError::BadAddress(format!(
                "byte enable {be} is out of range 0...3"
            )));
        }
        let data = be | if stick { MEMBE_M_STICK } else { 0 };
        self.wreg(self.cp(CP_MEMBE), data)
    }

    // The ibus window.

    fn ibr(&self, ibaddr: u16) -> Result<u16, CpuError> {
        let ibaddr = check_ibus_address(ibaddr)?;
        Ok(ibus_window_address(self.ibase, ibaddr))
    }

    pub fn ribr(&mut self, ibaddr: u16) -> Result<usize, CpuError> {
        let address = self.ibr(ibaddr)?;
        self.rreg(address)
    }

    pub fn rbibr(&mut self, ibaddr: u16, count: usize) -> Result<usize, CpuError> {
        let address = self.ibr(ibaddr)?;
        self.rblk(address, count)
    }

    pub fn wibr(&mut self, ibaddr: u16, data: u16) -> Result<usize, CpuError> {
        let address = self.ibr(ibaddr)?;
        self.wreg(address, data)
    }

    pub fn wbibr(&mut self, ibaddr: u16, words: Vec<u16>) -> Result<usize, CpuError> {
        let address = self.ibr(ibaddr)?;
        self.wblk(address, words)
    }

    pub fn rconf(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_CONF))
    }

    pub fn rstat(&mut self) -> Result<usize, CpuError> {
        self.rreg(self.cp(CP_STAT))
    }

    // Expectations on the most recent operation.

    pub fn edata(&mut self, value: u16, mask: u16) -> Result<(), CpuError> {
        Ok(self
            .batch
            .expect_last(ExpectationRecord::Data { value, mask })?)
    }

    pub fn eblock(&mut self, values: Vec<u16>, masks: Vec<u16>) -> Result<(), CpuError> {
        Ok(self
            .batch
            .expect_last(ExpectationRecord::Block { values, masks })?)
    }

    pub fn edone(&mut self, done: u16) -> Result<(), CpuError> {
        Ok(self
            .batch
            .expect_last(ExpectationRecord::CompletionCount(done))?)
    }

    pub fn estat(&mut self, value: u8, mask: u8) -> Result<(), CpuError> {
        Ok(self
            .batch
            .expect_last(ExpectationRecord::Status { value, mask })?)
    }

    pub fn estat_err(&mut self) -> Result<(), CpuError> {
        self.estat(Status::ERR, Status::FAULTS)
    }

    pub fn estat_nak(&mut self) -> Result<(), CpuError> {
        self.estat(Status::NAK, Status::FAULTS)
    }

    pub fn estat_tout(&mut self) -> Result<(), CpuError> {
        self.estat(Status::TOUT, Status::FAULTS)
    }

    /// Expect a memory access error reported by the CPU.
    pub fn estat_merr(&mut self) -> Result<(), CpuError> {
        self.estat(
            stat::CMD_MERR,
            Status::FAULTS | stat::CMD_MERR | stat::CMD_ERR,
        )
    }
}
