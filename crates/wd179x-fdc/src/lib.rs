//! WD179x-compatible floppy disk controller with a companion DMA engine,
//! the "one representative peripheral" of `spec.md` §1/§4.6.
//!
//! # Registers (offsets from the device's base, `0xFC30` by default)
//!
//! | Offset | Name | Description |
//! |---|---|---|
//! | 0x0 | CMD/STATUS | write: command; read: status |
//! | 0x1 | TRACK | track register |
//! | 0x2 | SECTOR | sector register |
//! | 0x3 | DATA | last byte transferred (also the READ_ADDRESS result byte) |
//! | 0x4 | DRIVE SELECT | bits 1-0 select drive, bit 2 selects side |
//! | 0x8 | DMA CTRL/STATUS | write: control; read: status |
//! | 0x9 | DMA STATUS | write-1-to-clear |
//! | 0xA | DMA COUNT LO | |
//! | 0xB | DMA COUNT HI | |
//! | 0xC | DMA ADDR LO | |
//! | 0xD | DMA ADDR HI | |
//! | 0xE | DMA ADDR EXT | bits beyond 16 of the 18-bit byte address |
//!
//! This offset assignment is this crate's own invention (`spec.md` only
//! commits to the 16-byte window and the five CPU-visible registers plus
//! a DMA control/status/count/address group, not their exact sub-layout);
//! see the workspace `DESIGN.md` for the open-question note.
//!
//! Command/timing semantics are grounded directly in `pdq3_fdc.c`'s
//! `fdc_docmd`/`fdc_svc`/`dma_transfer_to_ram`/`dma_transfer_from_ram`/
//! `fdc_autoload`, re-expressed as a deferred-service state machine driven
//! by `microengine_bus::EventWheel` rather than that source's SIMH-style
//! `sim_activate`.

mod bus_adapter;
mod command;
mod dma;
mod drive;
mod status;

pub use command::{Command, ForceInterrupt, TypeI, TypeIOp, TypeII, TypeIIOp, TypeIII, TypeIIIOp};
pub use dma::{Dma, DmaTarget};
pub use drive::{Drive, StepDirection};

use microengine_bus::EventWheel;

pub const REG_CMD_STATUS: u8 = 0x0;
pub const REG_TRACK: u8 = 0x1;
pub const REG_SECTOR: u8 = 0x2;
pub const REG_DATA: u8 = 0x3;
pub const REG_DRIVE_SELECT: u8 = 0x4;
pub const REG_DMA_BASE: u8 = 0x8;

/// `FDC_WAIT_STEP`: head-positioning delay, in guest cycles.
pub const DELAY_STEP: u64 = 3000;
/// `FDC_WAIT_READ`/`FDC_WAIT_WRITE`: sector transfer delay.
pub const DELAY_SECTOR: u64 = 8000;
/// `FDC_WAIT_READNEXT`/`FDC_WAIT_WRITENEXT`: between multi-sector steps.
pub const DELAY_NEXT_SECTOR: u64 = 800;
/// `FDC_WAIT_FORCEINT`.
pub const DELAY_FORCE_INT: u64 = 100;
/// `FDC_WAIT_IDXPULSE`, unused directly but named for parity with the
/// source's timing-constant table.
pub const DELAY_INDEX_PULSE: u64 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcEvent {
    /// The shared floppy/DMA interrupt (vector `0x0A`, level 2 in the
    /// P-code family's fixed assignment).
    Interrupt,
    /// Autoload's end-of-track abort: the host should call
    /// `pdq3::Pdq3::finish_autoload(dma_base)`, which adopts `dma_base`
    /// itself as `CTP` and restores `SSV`/`RQ` from that task's TIB.
    AutoloadFinished { dma_base: u16 },
}

#[derive(Debug, Clone, Copy)]
enum SectorOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
enum PendingOp {
    Step { direction: StepDirection, verify: bool },
    Restore { verify: bool },
    Seek { target: u8, verify: bool },
    Sector { op: SectorOp, multi: bool },
    ReadAddress,
    ForceInterrupt,
}

pub struct Wd179xFdc {
    status: u8,
    track_reg: u8,
    sector_reg: u8,
    data_reg: u8,
    drive_select: u8,
    drives: [Drive; 4],
    dma: Dma,
    wheel: EventWheel,
    pending: Option<(microengine_bus::EventId, PendingOp)>,
    /// `autoload-in-progress`: distinguishes the boot transfer's
    /// end-of-track abort from ordinary multi-sector completion.
    autoload: bool,
    autoload_word_base: u16,
}

impl Default for Wd179xFdc {
    fn default() -> Self {
        Self::new()
    }
}

impl Wd179xFdc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: 0,
            track_reg: 0,
            sector_reg: 1,
            data_reg: 0,
            drive_select: 0,
            drives: [Drive::new(), Drive::new(), Drive::new(), Drive::new()],
            dma: Dma::new(),
            wheel: EventWheel::new(),
            pending: None,
            autoload: false,
            autoload_word_base: 0,
        }
    }

    #[must_use]
    pub fn drive_mut(&mut self, index: usize) -> &mut Drive {
        &mut self.drives[index & 0x3]
    }

    #[must_use]
    pub fn drive(&self, index: usize) -> &Drive {
        &self.drives[index & 0x3]
    }

    fn selected_drive(&self) -> usize {
        (self.drive_select & 0x03) as usize
    }

    fn selected_head(&self) -> u8 {
        u8::from(self.drive_select & 0x04 != 0)
    }

    #[must_use]
    pub const fn busy(&self) -> bool {
        self.status & status::BUSY != 0
    }

    pub fn read_register(&mut self, offset: u8) -> u8 {
        if offset >= REG_DMA_BASE {
            return self.dma.read_reg(offset - REG_DMA_BASE);
        }
        match offset {
            REG_CMD_STATUS => {
                let ready_bit = if self.drive(self.selected_drive()).ready() { 0 } else { status::NOT_READY };
                (self.status & !status::NOT_READY) | ready_bit
            }
            REG_TRACK => self.track_reg,
            REG_SECTOR => self.sector_reg,
            REG_DATA => self.data_reg,
            REG_DRIVE_SELECT => self.drive_select,
            _ => 0xFF,
        }
    }

    pub fn write_register(&mut self, offset: u8, value: u8) -> Option<FdcEvent> {
        if offset >= REG_DMA_BASE {
            self.dma.write_reg(offset - REG_DMA_BASE, value);
            return None;
        }
        match offset {
            REG_CMD_STATUS => return self.issue_command(value),
            REG_TRACK => self.track_reg = value,
            REG_SECTOR => self.sector_reg = value,
            REG_DATA => self.data_reg = value,
            REG_DRIVE_SELECT => self.drive_select = value,
            _ => {}
        }
        None
    }

    /// `fdc_docmd`. Type I/II/III commands set BUSY and schedule a
    /// deferred service; Force Interrupt with the immediate bit set
    /// completes synchronously, mirroring the source's special case.
    fn issue_command(&mut self, byte: u8) -> Option<FdcEvent> {
        self.status &= !(status::CRC_ERROR | status::SEEK_ERROR_OR_RECORD_NOT_FOUND | status::WRITE_PROTECT);
        match command::decode(byte) {
            Command::TypeI(t) => {
                self.status |= status::BUSY;
                let op = match t.op {
                    TypeIOp::Restore => PendingOp::Restore { verify: t.verify },
                    TypeIOp::Seek => PendingOp::Seek { target: self.data_reg, verify: t.verify },
                    TypeIOp::Step => PendingOp::Step {
                        direction: self.drive(self.selected_drive()).step_direction.unwrap_or(StepDirection::In),
                        verify: t.verify,
                    },
                    TypeIOp::StepIn => PendingOp::Step { direction: StepDirection::In, verify: t.verify },
                    TypeIOp::StepOut => PendingOp::Step { direction: StepDirection::Out, verify: t.verify },
                };
                self.schedule(op, DELAY_STEP);
                None
            }
            Command::TypeII(t) => {
                self.status |= status::BUSY;
                let op = PendingOp::Sector {
                    op: match t.op {
                        TypeIIOp::ReadSector => SectorOp::Read,
                        TypeIIOp::WriteSector => SectorOp::Write,
                    },
                    multi: t.multi,
                };
                self.schedule(op, DELAY_SECTOR);
                None
            }
            Command::TypeIII(t) => {
                self.status |= status::BUSY;
                match t.op {
                    TypeIIIOp::ReadAddress => self.schedule(PendingOp::ReadAddress, DELAY_SECTOR),
                    TypeIIIOp::ReadTrack => self.schedule(
                        PendingOp::Sector {
                            op: SectorOp::Read,
                            multi: true,
                        },
                        DELAY_SECTOR,
                    ),
                    TypeIIIOp::WriteTrack => {
                        self.status |= status::NOT_IMPLEMENTED;
                        self.status &= !status::BUSY;
                        return Some(FdcEvent::Interrupt);
                    }
                }
                None
            }
            Command::ForceInterrupt(f) => {
                if f.immediate {
                    self.cancel_pending();
                    self.status &= !status::BUSY;
                    Some(FdcEvent::Interrupt)
                } else {
                    self.schedule(PendingOp::ForceInterrupt, DELAY_FORCE_INT);
                    None
                }
            }
        }
    }

    fn schedule(&mut self, op: PendingOp, delay: u64) {
        self.cancel_pending();
        let id = self.wheel.schedule(delay);
        self.pending = Some((id, op));
    }

    fn cancel_pending(&mut self) {
        if let Some((id, _)) = self.pending.take() {
            self.wheel.cancel(id);
        }
    }

    /// Advance guest time and run any service routine now due. Returns
    /// every interrupt/hand-off event the service produced.
    pub fn advance(&mut self, ticks: u64, mem: &mut impl DmaTarget) -> Vec<FdcEvent> {
        self.wheel.advance(ticks);
        let due = self.wheel.due();
        let mut events = Vec::new();
        for id in due {
            if self.pending.as_ref().is_some_and(|(pending_id, _)| *pending_id == id) {
                let (_, op) = self.pending.take().expect("checked above");
                if let Some(event) = self.service(op, mem) {
                    events.push(event);
                }
            }
        }
        events
    }

    fn service(&mut self, op: PendingOp, mem: &mut impl DmaTarget) -> Option<FdcEvent> {
        match op {
            PendingOp::Restore { verify } => {
                self.drive_mut(self.selected_drive()).restore();
                self.track_reg = 0;
                self.finish_positioning(verify)
            }
            PendingOp::Seek { target, verify } => {
                self.drive_mut(self.selected_drive()).seek(target);
                self.track_reg = target;
                self.finish_positioning(verify)
            }
            PendingOp::Step { direction, verify } => {
                self.drive_mut(self.selected_drive()).step(direction);
                self.finish_positioning(verify)
            }
            PendingOp::ForceInterrupt => {
                self.status &= !status::BUSY;
                Some(FdcEvent::Interrupt)
            }
            PendingOp::ReadAddress => {
                let drive_idx = self.selected_drive();
                let track = self.drive(drive_idx).track;
                self.sector_reg = track;
                self.data_reg = track;
                self.status &= !status::BUSY;
                Some(FdcEvent::Interrupt)
            }
            PendingOp::Sector { op, multi } => self.service_sector(op, multi, mem),
        }
    }

    fn finish_positioning(&mut self, verify: bool) -> Option<FdcEvent> {
        let drive_idx = self.selected_drive();
        self.status &= !(status::BUSY | status::SEEK_ERROR_OR_RECORD_NOT_FOUND | status::TRACK0_OR_LOST_DATA);
        if self.drive(drive_idx).is_track0() {
            self.status |= status::TRACK0_OR_LOST_DATA;
        }
        if verify && self.drive(drive_idx).track != self.track_reg {
            self.status |= status::SEEK_ERROR_OR_RECORD_NOT_FOUND;
        }
        Some(FdcEvent::Interrupt)
    }

    /// `fdc_readsec`/`fdc_writesec` + `dma_transfer_to_ram`/
    /// `dma_transfer_from_ram`: locate the sector, move its bytes through
    /// the DMA engine, and either finish or reschedule for the next
    /// sector on a multi-sector command.
    fn service_sector(&mut self, op: SectorOp, multi: bool, mem: &mut impl DmaTarget) -> Option<FdcEvent> {
        let drive_idx = self.selected_drive();
        let head = self.selected_head();
        if !self.drive(drive_idx).ready() {
            self.status = (self.status & !status::BUSY) | status::NOT_READY;
            return Some(FdcEvent::Interrupt);
        }
        let write_locked = self.drive(drive_idx).write_locked;
        if matches!(op, SectorOp::Write) && write_locked {
            self.status = (self.status & !status::BUSY) | status::WRITE_PROTECT;
            return Some(FdcEvent::Interrupt);
        }
        let track_num = self.drive(drive_idx).track;
        let sector_num = self.sector_reg;

        // Resolve everything needed from the track record into owned
        // values up front, so no borrow of `self` survives into the
        // mutation/transfer that follows.
        let found: Option<(usize, u8, bool)> = self.drive(drive_idx).image.as_ref().and_then(|image| {
            let track = image.track(track_num, head)?;
            let idx = track.index_of(sector_num)?;
            let last = idx + 1 >= track.sector_map.len();
            let next = track.sector_map.get(idx + 1).copied().unwrap_or(sector_num);
            Some((track.sector_size(), next, last))
        });
        let Some((size, next_sector, last_on_track)) = found else {
            self.status = (self.status & !status::BUSY) | status::SEEK_ERROR_OR_RECORD_NOT_FOUND;
            return Some(FdcEvent::Interrupt);
        };
        if self
            .drive(drive_idx)
            .image
            .as_ref()
            .is_some_and(|img| img.sector_has_error(track_num, head, sector_num))
        {
            self.status |= status::CRC_ERROR;
        }

        let transfer_result = match op {
            SectorOp::Read => {
                let bytes = self.drive(drive_idx).image.as_ref().expect("checked ready above").read_sector(track_num, head, sector_num).expect("checked above");
                let mut aborted = false;
                for &b in &bytes {
                    self.data_reg = b;
                    if self.dma.transfer_byte(b, mem).is_err() {
                        aborted = true;
                        break;
                    }
                }
                aborted
            }
            SectorOp::Write => {
                let mut buf = Vec::with_capacity(size);
                let mut aborted = false;
                for _ in 0..size {
                    match self.dma.transfer_byte(0, mem) {
                        Ok((_, byte)) => {
                            self.data_reg = byte;
                            buf.push(byte);
                        }
                        Err(()) => {
                            aborted = true;
                            break;
                        }
                    }
                }
                if !aborted {
                    self.drive_mut(drive_idx).image.as_mut().expect("checked ready above").write_sector(track_num, head, sector_num, &buf);
                }
                aborted
            }
        };

        if transfer_result {
            // DMA transfer itself faulted (TOI already set by `Dma`).
            self.status &= !status::BUSY;
            return Some(FdcEvent::Interrupt);
        }

        if multi && !last_on_track {
            self.sector_reg = next_sector;
            self.schedule(PendingOp::Sector { op, multi }, DELAY_NEXT_SECTOR);
            return None;
        }

        self.status &= !status::BUSY;
        if multi && last_on_track && self.autoload {
            self.autoload = false;
            return Some(FdcEvent::AutoloadFinished {
                dma_base: self.autoload_word_base,
            });
        }
        Some(FdcEvent::Interrupt)
    }

    /// `fdc_autoload`: program DMA with an unbounded count, select drive
    /// 0 single-density, and issue `READ_SEC_MULTI` against it. The
    /// transfer runs until the first track is exhausted, at which point
    /// [`Self::advance`] reports [`FdcEvent::AutoloadFinished`] instead of
    /// a plain completion interrupt.
    pub fn autoload(&mut self, word_load_base: u16) {
        self.drive_select = 0;
        self.sector_reg = 1;
        self.track_reg = 0;
        self.dma.ctrl = status::dma::CTRL_RUN | status::dma::CTRL_IOM;
        self.dma.set_count(0xFFFF);
        let base = u32::from(word_load_base) * 2;
        self.dma.set_address(base);
        self.autoload = true;
        self.autoload_word_base = word_load_base;
        self.schedule(
            PendingOp::Sector {
                op: SectorOp::Read,
                multi: true,
            },
            DELAY_SECTOR,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_imd::ImdImage;

    struct FakeMem {
        cells: Vec<u8>,
    }

    impl FakeMem {
        fn new(size: usize) -> Self {
            Self { cells: vec![0; size] }
        }
    }

    impl DmaTarget for FakeMem {
        fn dma_read(&mut self, addr: u32) -> u8 {
            self.cells.get(addr as usize).copied().unwrap_or(0)
        }
        fn dma_write(&mut self, addr: u32, value: u8) -> bool {
            if let Some(slot) = self.cells.get_mut(addr as usize) {
                *slot = value;
                true
            } else {
                false
            }
        }
    }

    #[test]
    fn restore_seeks_to_track_zero() {
        let mut fdc = Wd179xFdc::new();
        fdc.drive_mut(0).mount(ImdImage::format_pdq3_blank("IMD test\n"), false);
        fdc.drive_mut(0).track = 40;
        fdc.write_register(REG_CMD_STATUS, 0x03);
        assert!(fdc.busy());
        let mut mem = FakeMem::new(16);
        let events = fdc.advance(DELAY_STEP, &mut mem);
        assert!(!fdc.busy());
        assert!(fdc.drive(0).is_track0());
        assert_eq!(events, vec![FdcEvent::Interrupt]);
    }

    #[test]
    fn seek_to_nonexistent_drive_sets_not_ready() {
        let mut fdc = Wd179xFdc::new();
        fdc.write_register(REG_CMD_STATUS, 0x90); // read sector, multi
        let mut mem = FakeMem::new(16);
        let events = fdc.advance(DELAY_SECTOR, &mut mem);
        assert_eq!(fdc.read_register(REG_CMD_STATUS) & status::NOT_READY, status::NOT_READY);
        assert_eq!(events, vec![FdcEvent::Interrupt]);
    }

    #[test]
    fn read_sector_not_found_sets_status_bit() {
        let mut fdc = Wd179xFdc::new();
        fdc.drive_mut(0).mount(ImdImage::format_pdq3_blank("IMD test\n"), false);
        fdc.write_register(REG_SECTOR, 99);
        fdc.write_register(REG_CMD_STATUS, 0x80);
        let mut mem = FakeMem::new(16);
        fdc.advance(DELAY_SECTOR, &mut mem);
        assert_eq!(fdc.status & status::SEEK_ERROR_OR_RECORD_NOT_FOUND, status::SEEK_ERROR_OR_RECORD_NOT_FOUND);
    }

    #[test]
    fn write_to_locked_image_sets_write_protect() {
        let mut fdc = Wd179xFdc::new();
        fdc.drive_mut(0).mount(ImdImage::format_pdq3_blank("IMD test\n"), true);
        fdc.write_register(REG_SECTOR, 1);
        fdc.write_register(REG_CMD_STATUS, 0xA0);
        let mut mem = FakeMem::new(512);
        fdc.advance(DELAY_SECTOR, &mut mem);
        assert_eq!(fdc.status & status::WRITE_PROTECT, status::WRITE_PROTECT);
    }

    #[test]
    fn read_sector_transfers_fill_bytes_via_dma() {
        let mut fdc = Wd179xFdc::new();
        fdc.drive_mut(0).mount(ImdImage::format_pdq3_blank("IMD test\n"), false);
        fdc.write_register(REG_SECTOR, 1);
        fdc.dma.ctrl = status::dma::CTRL_RUN | status::dma::CTRL_IOM;
        fdc.dma.set_count(128);
        fdc.dma.set_address(0x1000);
        fdc.write_register(REG_CMD_STATUS, 0x80);
        let mut mem = FakeMem::new(0x2000);
        let events = fdc.advance(DELAY_SECTOR, &mut mem);
        assert_eq!(events, vec![FdcEvent::Interrupt]);
        assert_eq!(mem.cells[0x1000], format_imd::FILL_BYTE);
        assert_eq!(mem.cells[0x1000 + 127], format_imd::FILL_BYTE);
    }

    #[test]
    fn write_track_is_accepted_but_inert() {
        let mut fdc = Wd179xFdc::new();
        let event = fdc.write_register(REG_CMD_STATUS, 0xF0);
        assert_eq!(event, Some(FdcEvent::Interrupt));
        assert!(!fdc.busy());
        assert_eq!(fdc.status & status::NOT_IMPLEMENTED, status::NOT_IMPLEMENTED);
    }

    #[test]
    fn force_interrupt_immediate_completes_synchronously() {
        let mut fdc = Wd179xFdc::new();
        fdc.write_register(REG_CMD_STATUS, 0x03); // restore, schedules
        assert!(fdc.busy());
        let event = fdc.write_register(REG_CMD_STATUS, 0xD8); // force int, immediate
        assert_eq!(event, Some(FdcEvent::Interrupt));
        assert!(!fdc.busy());
    }

    #[test]
    fn autoload_streams_track_zero_and_hands_off() {
        let mut fdc = Wd179xFdc::new();
        let image = ImdImage::format_pdq3_blank("IMD test\n");
        fdc.drive_mut(0).mount(image, false);
        let mut mem = FakeMem::new(0x10000);
        let load_base = 0x2000u16;
        fdc.autoload(load_base);
        let mut events = Vec::new();
        for _ in 0..26 {
            events.extend(fdc.advance(DELAY_SECTOR.max(DELAY_NEXT_SECTOR), &mut mem));
        }
        // The host hands `dma_base` straight to `pdq3::Pdq3::finish_autoload`,
        // which derives CTP/SSV/RQ itself from the TIB already streamed there.
        assert_eq!(events, vec![FdcEvent::AutoloadFinished { dma_base: load_base }]);
    }
}
