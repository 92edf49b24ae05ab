//! Seam to the 64DD disk-drive subsystem.
//!
//! The drive itself lives outside this crate; the bus only needs typed
//! reads and writes against its register banks. Absence is modeled by the
//! bus holding `Option<Box<dyn DiskDrive>>` — with no drive attached,
//! reads in the gated windows return the floating-bus pattern and writes
//! are discarded.

/// Register bank within the disk-drive address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdRegion {
    /// Command-to-sector registers (0x0500_0000..=0x0500_03FF).
    CommandRegs,
    /// Sector data buffer (0x0500_0400..=0x0500_04FF).
    SectorBuf,
    /// Drive control registers (0x0500_0500..=0x0500_057F).
    Control,
    /// Motor/seek registers (0x0500_0580..=0x0500_05BF).
    MotorSeek,
    /// Boot IPL ROM (0x0600_0000..=0x063F_FFFF).
    IplRom,
}

/// Disk-drive register access. Halfword for DMA-class transfers, word for
/// CPU-class transfers; no other width exists on this bus.
pub trait DiskDrive {
    fn read_u16(&mut self, region: DdRegion, addr: u32) -> u16;
    fn read_u32(&mut self, region: DdRegion, addr: u32) -> u32;
    fn write_u16(&mut self, region: DdRegion, addr: u32, val: u16);
    fn write_u32(&mut self, region: DdRegion, addr: u32, val: u32);
}
