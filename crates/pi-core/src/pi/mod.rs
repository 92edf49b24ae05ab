//! PI — Peripheral Interface bus dispatcher.
//!
//! Routes CPU-class (word) and DMA-class (halfword) accesses to the
//! devices hanging off the cartridge port, and models the long-latency
//! bus write: a word write latches its value, holds the bus busy for 400
//! cycles, and completes through the scheduling queue. A CPU read that
//! arrives while the bus is busy returns the latched value and forces
//! the write to finish, crediting the unexpired cycles back to the
//! reader. A second write while busy is silently dropped, exactly like
//! real hardware.

use crate::bus::{decode, unmapped_word, Mapped};
use crate::cart::Cartridge;
use crate::dd::DiskDrive;
use crate::queue::{Event, Queue};
use crate::sc64::Sc64;

/// Cycles a word write occupies the bus.
const BUS_WRITE_LATENCY: u64 = 400;
/// Cycles charged to a CPU word read that goes out on the bus.
const BUS_READ_COST: u64 = 250;

/// Top of the PI's own register space; everything above goes out on the
/// cartridge bus.
const IO_REGS_TOP: u32 = 0x046F_FFFF;

/// DMA transfer requested by a register write, for the external DMA
/// engine to execute.
pub enum PiDmaRequest {
    None,
    /// Cart → RDRAM (PI_WR_LEN).
    Write,
    /// RDRAM → Cart (PI_RD_LEN).
    Read,
}

pub struct Pi {
    pub cart: Cartridge,
    pub dd: Option<Box<dyn DiskDrive>>,
    pub sc64: Sc64,
    pub dram_addr: u32,
    pub cart_addr: u32,
    /// Pending DMA length (set by a PI_RD_LEN/PI_WR_LEN write, consumed
    /// by the DMA engine).
    pub pending_dma_len: u32,
    // Bus timing registers (rarely used by games)
    pub dom1_lat: u32,
    pub dom1_pwd: u32,
    pub dom1_pgs: u32,
    pub dom1_rls: u32,
    pub dom2_lat: u32,
    pub dom2_pwd: u32,
    pub dom2_pgs: u32,
    pub dom2_rls: u32,
    io_busy: bool,
    bus_latch: u32,
}

impl Pi {
    pub fn new(cart: Cartridge) -> Self {
        Self {
            cart,
            dd: None,
            sc64: Sc64::new(),
            dram_addr: 0,
            cart_addr: 0,
            pending_dma_len: 0,
            dom1_lat: 0,
            dom1_pwd: 0,
            dom1_pgs: 0,
            dom1_rls: 0,
            dom2_lat: 0,
            dom2_pwd: 0,
            dom2_pgs: 0,
            dom2_rls: 0,
            io_busy: false,
            bus_latch: 0,
        }
    }

    /// Whether a long-latency bus write is still in flight.
    pub fn is_busy(&self) -> bool {
        self.io_busy
    }

    /// The value latched by the in-flight (or last) bus write.
    pub fn latched_value(&self) -> u32 {
        self.bus_latch
    }

    /// Natural completion of the pending bus write (queue event fired).
    pub fn write_finished(&mut self) {
        self.io_busy = false;
    }

    /// Drain the pending bus write immediately. Returns the cycles it
    /// had left, which the caller adds to its own budget.
    pub fn write_force_finish(&mut self, queue: &mut Queue) -> u64 {
        self.io_busy = false;
        queue.remove(Event::PiBusWrite)
    }

    /// CPU-class word read.
    pub fn read_word(&mut self, addr: u32, queue: &mut Queue, cycles: &mut u64) -> u32 {
        if addr <= IO_REGS_TOP {
            return self.io_read(addr);
        }
        if self.io_busy {
            *cycles += self.write_force_finish(queue);
            return self.bus_latch;
        }
        *cycles += BUS_READ_COST;
        self.bus_read32(addr)
    }

    /// CPU-class word write. Dropped while a previous write is still in
    /// flight — the guest is expected to poll PI_STATUS first.
    pub fn write_word(&mut self, addr: u32, val: u32, queue: &mut Queue) -> PiDmaRequest {
        if addr <= IO_REGS_TOP {
            return self.io_write(addr, val);
        }
        if self.io_busy {
            log::debug!("PI bus write to {:#010X} dropped while busy", addr);
            return PiDmaRequest::None;
        }
        self.io_busy = true;
        self.bus_latch = val;
        queue.insert(Event::PiBusWrite, BUS_WRITE_LATENCY);
        self.bus_write32(addr, val, queue);
        PiDmaRequest::None
    }

    /// Raw DMA-class halfword read, bypassing the busy/latch gate.
    pub fn bus_read16(&mut self, addr: u32) -> u16 {
        match decode(addr) {
            Mapped::Dd(region) => match self.dd.as_mut() {
                Some(dd) => dd.read_u16(region, addr),
                None => unmapped_word(addr) as u16,
            },
            Mapped::CartSave => {
                if let Some(sram) = self.cart.sram.as_ref() {
                    sram.read_u16(addr)
                } else if let Some(flash) = self.cart.flash.as_ref() {
                    flash.read_u16(addr)
                } else {
                    unmapped_word(addr) as u16
                }
            }
            Mapped::CartRom => match self.cart.rom.as_ref() {
                Some(rom) => rom.read_u16(addr),
                None => unmapped_word(addr) as u16,
            },
            Mapped::RomViewer => self.cart.viewer.read_u16(addr),
            Mapped::Sc64Regs => match self.sc64.read_reg(addr) {
                Some(val) => val as u16,
                None => unmapped_word(addr) as u16,
            },
            Mapped::Unmapped => unmapped_word(addr) as u16,
        }
    }

    /// Raw CPU-class word read, bypassing the busy/latch gate.
    pub fn bus_read32(&mut self, addr: u32) -> u32 {
        match decode(addr) {
            Mapped::Dd(region) => match self.dd.as_mut() {
                Some(dd) => dd.read_u32(region, addr),
                None => unmapped_word(addr),
            },
            Mapped::CartSave => {
                if let Some(sram) = self.cart.sram.as_ref() {
                    sram.read_u32(addr)
                } else if let Some(flash) = self.cart.flash.as_ref() {
                    flash.read_u32(addr)
                } else {
                    unmapped_word(addr)
                }
            }
            Mapped::CartRom => match self.cart.rom.as_ref() {
                Some(rom) => rom.read_u32(addr),
                None => unmapped_word(addr),
            },
            Mapped::RomViewer => self.cart.viewer.read_u32(addr),
            Mapped::Sc64Regs => self
                .sc64
                .read_reg(addr)
                .unwrap_or_else(|| unmapped_word(addr)),
            Mapped::Unmapped => unmapped_word(addr),
        }
    }

    /// Raw DMA-class halfword write.
    pub fn bus_write16(&mut self, addr: u32, val: u16, queue: &mut Queue) {
        match decode(addr) {
            Mapped::Dd(region) => {
                if let Some(dd) = self.dd.as_mut() {
                    dd.write_u16(region, addr, val);
                }
            }
            Mapped::CartSave => {
                if let Some(sram) = self.cart.sram.as_mut() {
                    sram.write_u16(addr, val);
                } else if let Some(flash) = self.cart.flash.as_mut() {
                    flash.write_u16(addr, val);
                }
            }
            Mapped::CartRom => {
                if self.sc64.config.sdram_writable {
                    if let Some(rom) = self.cart.rom.as_mut() {
                        rom.write_u16(addr, val);
                    }
                }
            }
            Mapped::RomViewer => {
                // Debugging channel for homebrew, be gentle.
                let _ = self.write_force_finish(queue);
                self.cart.viewer.write_u16(addr, val);
            }
            Mapped::Sc64Regs => {
                let Pi { sc64, cart, .. } = self;
                sc64.write_reg(addr, val as u32, cart);
            }
            Mapped::Unmapped => {}
        }
    }

    /// Raw CPU-class word write.
    pub fn bus_write32(&mut self, addr: u32, val: u32, queue: &mut Queue) {
        match decode(addr) {
            Mapped::Dd(region) => {
                if let Some(dd) = self.dd.as_mut() {
                    dd.write_u32(region, addr, val);
                }
            }
            Mapped::CartSave => {
                if let Some(sram) = self.cart.sram.as_mut() {
                    sram.write_u32(addr, val);
                } else if let Some(flash) = self.cart.flash.as_mut() {
                    flash.write_u32(addr, val);
                }
            }
            Mapped::CartRom => {
                // SC64 maps SDRAM over the ROM window; writes only land
                // once the guest enabled them via config-update.
                if self.sc64.config.sdram_writable {
                    if let Some(rom) = self.cart.rom.as_mut() {
                        rom.write_u32(addr, val);
                    }
                }
            }
            Mapped::RomViewer => {
                // Debugging channel for homebrew, be gentle.
                let _ = self.write_force_finish(queue);
                self.cart.viewer.write_u32(addr, val);
            }
            Mapped::Sc64Regs => {
                let Pi { sc64, cart, .. } = self;
                sc64.write_reg(addr, val, cart);
            }
            Mapped::Unmapped => {}
        }
    }

    fn io_read(&self, addr: u32) -> u32 {
        if !(0x0460_0000..=IO_REGS_TOP).contains(&addr) {
            return unmapped_word(addr);
        }
        match addr & 0x0F_FFFF {
            0x00 => self.dram_addr,
            0x04 => self.cart_addr,
            0x10 => {
                // PI_STATUS: bit 0 = DMA busy, bit 1 = IO busy
                (self.io_busy as u32) << 1
            }
            0x14 => self.dom1_lat,
            0x18 => self.dom1_pwd,
            0x1C => self.dom1_pgs,
            0x20 => self.dom1_rls,
            0x24 => self.dom2_lat,
            0x28 => self.dom2_pwd,
            0x2C => self.dom2_pgs,
            0x30 => self.dom2_rls,
            _ => 0,
        }
    }

    fn io_write(&mut self, addr: u32, val: u32) -> PiDmaRequest {
        if !(0x0460_0000..=IO_REGS_TOP).contains(&addr) {
            return PiDmaRequest::None;
        }
        log::debug!("PI write: reg={:#04X} val={:#010X}", addr & 0x0F_FFFF, val);
        match addr & 0x0F_FFFF {
            0x00 => {
                self.dram_addr = val & 0x00FF_FFFF;
                PiDmaRequest::None
            }
            0x04 => {
                self.cart_addr = val;
                PiDmaRequest::None
            }
            0x08 => {
                // PI_RD_LEN: RDRAM → Cart
                self.pending_dma_len = (val & 0x00FF_FFFF) + 1;
                PiDmaRequest::Read
            }
            0x0C => {
                // PI_WR_LEN: Cart → RDRAM
                self.pending_dma_len = (val & 0x00FF_FFFF) + 1;
                PiDmaRequest::Write
            }
            0x10 => {
                // PI_STATUS write: interrupt ack is the DMA engine's concern.
                PiDmaRequest::None
            }
            0x14 => {
                self.dom1_lat = val & 0xFF;
                PiDmaRequest::None
            }
            0x18 => {
                self.dom1_pwd = val & 0xFF;
                PiDmaRequest::None
            }
            0x1C => {
                self.dom1_pgs = val & 0x0F;
                PiDmaRequest::None
            }
            0x20 => {
                self.dom1_rls = val & 0x03;
                PiDmaRequest::None
            }
            0x24 => {
                self.dom2_lat = val & 0xFF;
                PiDmaRequest::None
            }
            0x28 => {
                self.dom2_pwd = val & 0xFF;
                PiDmaRequest::None
            }
            0x2C => {
                self.dom2_pgs = val & 0x0F;
                PiDmaRequest::None
            }
            0x30 => {
                self.dom2_rls = val & 0x03;
                PiDmaRequest::None
            }
            _ => PiDmaRequest::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{Rom, Sram};
    use crate::dd::{DdRegion, DiskDrive};

    struct TestDrive;

    impl DiskDrive for TestDrive {
        fn read_u16(&mut self, _region: DdRegion, _addr: u32) -> u16 {
            0x5A5A
        }
        fn read_u32(&mut self, region: DdRegion, _addr: u32) -> u32 {
            match region {
                DdRegion::CommandRegs => 0x1111_1111,
                DdRegion::IplRom => 0x2222_2222,
                _ => 0x3333_3333,
            }
        }
        fn write_u16(&mut self, _region: DdRegion, _addr: u32, _val: u16) {}
        fn write_u32(&mut self, _region: DdRegion, _addr: u32, _val: u32) {}
    }

    fn pi() -> (Pi, Queue) {
        (Pi::new(Cartridge::empty()), Queue::new())
    }

    #[test]
    fn absent_drive_reads_float() {
        let (mut pi, _q) = pi();
        assert_eq!(pi.bus_read32(0x0500_0000), unmapped_word(0x0500_0000));
        assert_eq!(pi.bus_read32(0x0600_0000), unmapped_word(0x0600_0000));
        assert_eq!(pi.bus_read16(0x0500_0400), unmapped_word(0x0500_0400) as u16);
    }

    #[test]
    fn present_drive_reads_through() {
        let (mut pi, _q) = pi();
        pi.dd = Some(Box::new(TestDrive));
        assert_eq!(pi.bus_read32(0x0500_0000), 0x1111_1111);
        assert_eq!(pi.bus_read32(0x0600_0000), 0x2222_2222);
        assert_eq!(pi.bus_read16(0x0500_0400), 0x5A5A);
    }

    #[test]
    fn unmapped_read_synthesizes_pattern() {
        let (mut pi, mut q) = pi();
        let mut cycles = 0u64;
        let v = pi.read_word(0x0570_1234, &mut q, &mut cycles);
        assert_eq!(v, 0x1234_1234);
        assert_eq!(cycles, 250);
    }

    #[test]
    fn save_window_prefers_sram_over_flash() {
        let (mut pi, _q) = pi();
        assert_eq!(pi.bus_read32(0x0800_0000), unmapped_word(0x0800_0000));
        pi.cart.sram = Some(Sram::new());
        pi.cart.flash = Some(crate::cart::Flash::new());
        pi.bus_write32(0x0800_0010, 0xCAFE_F00D, &mut Queue::new());
        assert_eq!(pi.bus_read32(0x0800_0010), 0xCAFE_F00D);
        // Flash still holds erased bytes at that offset.
        assert_eq!(pi.cart.flash.as_ref().unwrap().read_u32(0x0800_0010), 0xFFFF_FFFF);
    }

    #[test]
    fn busy_read_returns_latch_and_forces_finish() {
        let (mut pi, mut q) = pi();
        pi.write_word(0x1000_0000, 0xAABB_CCDD, &mut q);
        assert!(pi.is_busy());

        let mut cycles = 0u64;
        let v = pi.read_word(0x1000_0000, &mut q, &mut cycles);
        assert_eq!(v, 0xAABB_CCDD);
        assert!(!pi.is_busy());
        // The full latency was still pending; the reader gets it back.
        assert_eq!(cycles, 400);
        // The completion event is gone.
        assert!(q.step(1000).is_empty());
    }

    #[test]
    fn write_while_busy_is_dropped() {
        let (mut pi, mut q) = pi();
        pi.write_word(0x1000_0000, 0x1111_1111, &mut q);
        // Second write: latch unchanged, target register unchanged,
        // original completion still pending.
        pi.write_word(0x1FFF_0004, 0x2222_2222, &mut q);
        assert_eq!(pi.latched_value(), 0x1111_1111);
        assert_eq!(pi.sc64.data[0], 0);
        assert_eq!(q.step(400), vec![Event::PiBusWrite]);
    }

    #[test]
    fn natural_completion_clears_busy() {
        let (mut pi, mut q) = pi();
        pi.write_word(0x1000_0000, 0xDEAD_BEEF, &mut q);
        for ev in q.step(400) {
            match ev {
                Event::PiBusWrite => pi.write_finished(),
            }
        }
        assert!(!pi.is_busy());
        // Next write goes through again.
        pi.write_word(0x1FFF_0004, 7, &mut q);
        assert_eq!(pi.sc64.data[0], 7);
    }

    #[test]
    fn viewer_write_force_finishes_pending_write() {
        let (mut pi, mut q) = pi();
        pi.write_word(0x13FF_0020, 0x7465_7374, &mut q);
        // The viewer path force-finished the write it just started.
        assert!(!pi.is_busy());
        assert!(q.step(1000).is_empty());
    }

    #[test]
    fn rom_window_write_gated_on_sdram_writable() {
        let mut pi = Pi::new(Cartridge::new(Rom::from_bytes(vec![0u8; 0x100])));
        let mut q = Queue::new();
        pi.bus_write32(0x1000_0000, 0x0102_0304, &mut q);
        assert_eq!(pi.bus_read32(0x1000_0000), 0);
        pi.sc64.config.sdram_writable = true;
        pi.bus_write32(0x1000_0000, 0x0102_0304, &mut q);
        assert_eq!(pi.bus_read32(0x1000_0000), 0x0102_0304);
    }

    #[test]
    fn sc64_block_reads_version_and_floats_elsewhere() {
        let (mut pi, _q) = pi();
        assert_eq!(pi.bus_read32(0x1FFF_000C), crate::sc64::VERSION);
        assert_eq!(pi.bus_read32(0x1FFF_0003), unmapped_word(0x1FFF_0003));
    }

    #[test]
    fn status_register_reflects_io_busy() {
        let (mut pi, mut q) = pi();
        assert_eq!(pi.io_read(0x0460_0010), 0);
        pi.write_word(0x1000_0000, 1, &mut q);
        assert_eq!(pi.io_read(0x0460_0010), 0b10);
    }

    #[test]
    fn dma_register_writes_surface_requests() {
        let (mut pi, mut q) = pi();
        pi.write_word(0x0460_0000, 0x00AB_CDEF, &mut q);
        pi.write_word(0x0460_0004, 0x1000_0000, &mut q);
        let req = pi.write_word(0x0460_000C, 0x7, &mut q);
        assert!(matches!(req, PiDmaRequest::Write));
        assert_eq!(pi.dram_addr, 0x00AB_CDEF);
        assert_eq!(pi.cart_addr, 0x1000_0000);
        assert_eq!(pi.pending_dma_len, 8);
        // Register traffic never engages the bus latch.
        assert!(!pi.is_busy());
    }
}
