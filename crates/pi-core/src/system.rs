use std::path::Path;

use crate::cart::{self, Cartridge};
use crate::pi::{Pi, PiDmaRequest};
use crate::queue::{Event, Queue};

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("ROM error: {0}")]
    Rom(#[from] cart::rom::RomError),
}

/// The PI subsystem wired together: the bus dispatcher, its scheduling
/// queue, and the cycle counter shared with the CPU core.
pub struct System {
    pub pi: Pi,
    pub queue: Queue,
    pub cycles: u64,
}

impl System {
    pub fn new(cart: Cartridge) -> Self {
        Self {
            pi: Pi::new(cart),
            queue: Queue::new(),
            cycles: 0,
        }
    }

    /// Create a system by loading a ROM image from disk.
    pub fn from_rom(path: &Path) -> Result<Self, SystemError> {
        let rom = cart::Rom::load(path)?;
        Ok(Self::new(Cartridge::new(rom)))
    }

    pub fn with_disk_drive(cart: Cartridge, dd: Box<dyn crate::dd::DiskDrive>) -> Self {
        let mut sys = Self::new(cart);
        sys.pi.dd = Some(dd);
        sys
    }

    /// CPU-class word read; bus cost lands on the shared cycle counter.
    pub fn read_word(&mut self, addr: u32) -> u32 {
        let mut cycles = 0u64;
        let val = self.pi.read_word(addr, &mut self.queue, &mut cycles);
        self.cycles += cycles;
        val
    }

    /// CPU-class word write. Returns any DMA request for the external
    /// DMA engine to execute.
    pub fn write_word(&mut self, addr: u32, val: u32) -> PiDmaRequest {
        self.pi.write_word(addr, val, &mut self.queue)
    }

    /// Advance emulated time, completing any bus write whose latency
    /// has elapsed.
    pub fn step(&mut self, cycles: u64) {
        for event in self.queue.step(cycles) {
            match event {
                Event::PiBusWrite => self.pi.write_finished(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::Rom;

    #[test]
    fn write_then_step_then_write_again() {
        let mut sys = System::new(Cartridge::empty());
        sys.write_word(0x1000_0000, 0xA5A5_A5A5);
        assert!(sys.pi.is_busy());
        sys.step(399);
        assert!(sys.pi.is_busy());
        sys.step(1);
        assert!(!sys.pi.is_busy());
        sys.write_word(0x1FFF_0004, 42);
        assert_eq!(sys.pi.sc64.data[0], 42);
    }

    #[test]
    fn busy_read_credits_cycles_to_the_counter() {
        let mut sys = System::new(Cartridge::empty());
        sys.write_word(0x1000_0000, 0x1234_5678);
        sys.step(150);
        let before = sys.cycles;
        let val = sys.read_word(0x1000_0000);
        assert_eq!(val, 0x1234_5678);
        assert_eq!(sys.cycles - before, 250); // 400 scheduled - 150 elapsed
        assert!(!sys.pi.is_busy());
    }

    #[test]
    fn sc64_version_visible_through_cpu_path() {
        let mut sys = System::new(Cartridge::new(Rom::from_bytes(vec![0u8; 64])));
        assert_eq!(sys.read_word(0x1FFF_000C), crate::sc64::VERSION);
    }
}
