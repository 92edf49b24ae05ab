//! Cartridge-side devices on the PI bus.
//!
//! All stores are big-endian, matching the bus byte order. Out-of-range
//! reads return 0 and out-of-range writes are dropped; window-level
//! fallback (the floating-bus pattern) is the dispatcher's job.

pub mod rom;
pub mod viewer;

pub use rom::Rom;
pub use viewer::RomViewer;

pub(crate) fn read_be16(data: &[u8], off: usize) -> u16 {
    if off + 1 < data.len() {
        u16::from_be_bytes([data[off], data[off + 1]])
    } else {
        0
    }
}

pub(crate) fn read_be32(data: &[u8], off: usize) -> u32 {
    if off + 3 < data.len() {
        u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
    } else {
        0
    }
}

pub(crate) fn write_be16(data: &mut [u8], off: usize, val: u16) {
    if off + 1 < data.len() {
        data[off..off + 2].copy_from_slice(&val.to_be_bytes());
    }
}

pub(crate) fn write_be32(data: &mut [u8], off: usize, val: u32) {
    if off + 3 < data.len() {
        data[off..off + 4].copy_from_slice(&val.to_be_bytes());
    }
}

/// Battery-backed SRAM save store (32 KB).
pub struct Sram {
    data: Vec<u8>,
}

impl Sram {
    pub const SIZE: usize = 0x8000;

    pub fn new() -> Self {
        Self {
            data: vec![0u8; Self::SIZE],
        }
    }

    fn offset(addr: u32) -> usize {
        (addr as usize) & (Self::SIZE - 1)
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        read_be16(&self.data, Self::offset(addr))
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        read_be32(&self.data, Self::offset(addr))
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) {
        write_be16(&mut self.data, Self::offset(addr), val);
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) {
        write_be32(&mut self.data, Self::offset(addr), val);
    }
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

/// FlashRAM save store (128 KB). Plain byte array here — the flash
/// command state machine belongs to the save subsystem, the bus only
/// moves bytes.
pub struct Flash {
    data: Vec<u8>,
}

impl Flash {
    pub const SIZE: usize = 0x20000;

    pub fn new() -> Self {
        Self {
            data: vec![0xFF; Self::SIZE],
        }
    }

    fn offset(addr: u32) -> usize {
        (addr as usize) & (Self::SIZE - 1)
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        read_be16(&self.data, Self::offset(addr))
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        read_be32(&self.data, Self::offset(addr))
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) {
        write_be16(&mut self.data, Self::offset(addr), val);
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) {
        write_be32(&mut self.data, Self::offset(addr), val);
    }
}

impl Default for Flash {
    fn default() -> Self {
        Self::new()
    }
}

/// The full cartridge: ROM plus optional save stores plus the debug text
/// window. Every slot except the viewer may be absent; the dispatcher
/// falls back to the floating-bus pattern when it is.
pub struct Cartridge {
    pub rom: Option<Rom>,
    pub sram: Option<Sram>,
    pub flash: Option<Flash>,
    pub viewer: RomViewer,
}

impl Cartridge {
    pub fn new(rom: Rom) -> Self {
        Self {
            rom: Some(rom),
            sram: None,
            flash: None,
            viewer: RomViewer::new(),
        }
    }

    /// A cartridge slot with nothing in it.
    pub fn empty() -> Self {
        Self {
            rom: None,
            sram: None,
            flash: None,
            viewer: RomViewer::new(),
        }
    }

    // Byte-level ROM access for the SC64 command engine, which streams
    // payloads through the ROM/SDRAM window.

    pub fn rom_read_u8(&self, addr: u32) -> u8 {
        self.rom.as_ref().map_or(0, |rom| rom.read_u8(addr))
    }

    pub fn rom_read_u32(&self, addr: u32) -> u32 {
        self.rom.as_ref().map_or(0, |rom| rom.read_u32(addr))
    }

    pub fn rom_write_u8(&mut self, addr: u32, val: u8) {
        if let Some(rom) = self.rom.as_mut() {
            rom.write_u8(addr, val);
        }
    }
}
