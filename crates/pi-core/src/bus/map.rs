//! Physical address decoding for the PI bus.
//!
//! `decode` is pure and total: every 32-bit physical address maps to
//! exactly one window. Peripheral presence is *not* checked here — the
//! dispatcher in `pi` decides whether a gated window has a device behind
//! it, so the decoder can be tested without building any hardware.

use crate::dd::DdRegion;

/// The window a physical address falls into.
///
/// Windows are disjoint and cover the whole address space; anything not
/// claimed by a device decodes to `Unmapped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapped {
    /// One of the 64DD register banks or its boot ROM (gated on presence).
    Dd(DdRegion),
    /// Cartridge save window — SRAM preferred over flash when both exist.
    CartSave,
    /// Cartridge ROM window (also the SC64's SDRAM mapping).
    CartRom,
    /// ISViewer-style debug text window.
    RomViewer,
    /// SC64 configuration/debug register block (16 bytes).
    Sc64Regs,
    /// No device. Reads synthesize the floating-bus pattern, writes are
    /// discarded.
    Unmapped,
}

/// Base of the SC64 register block.
pub const SC64_REGS_BASE: u32 = 0x1FFF_0000;

/// Value read back from an address with no device behind it.
///
/// The PI bus floats: the low halfword of the address appears in both
/// halves of the returned word.
#[inline]
pub fn unmapped_word(addr: u32) -> u32 {
    (addr & 0xFFFF) | (addr << 16)
}

/// Map a physical address to its backing window.
pub fn decode(addr: u32) -> Mapped {
    match addr {
        // Low range is RCP/RDRAM territory, reachable from here only via
        // DMA; the PI itself sees it as open bus.
        0x0000_0000..=0x04FF_FFFF => Mapped::Unmapped,
        0x0500_0000..=0x0500_03FF => Mapped::Dd(DdRegion::CommandRegs),
        0x0500_0400..=0x0500_04FF => Mapped::Dd(DdRegion::SectorBuf),
        0x0500_0500..=0x0500_057F => Mapped::Dd(DdRegion::Control),
        0x0500_0580..=0x0500_05BF => Mapped::Dd(DdRegion::MotorSeek),
        0x0500_05C0..=0x05FF_FFFF => Mapped::Unmapped,
        0x0600_0000..=0x063F_FFFF => Mapped::Dd(DdRegion::IplRom),
        0x0640_0000..=0x07FF_FFFF => Mapped::Unmapped,
        0x0800_0000..=0x0FFF_FFFF => Mapped::CartSave,
        0x1000_0000..=0x13FE_FFFF => Mapped::CartRom,
        0x13FF_0000..=0x13FF_FFFF => Mapped::RomViewer,
        0x1FFF_0000..=0x1FFF_000F => Mapped::Sc64Regs,
        _ => Mapped::Unmapped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_pattern_mirrors_low_halfword() {
        assert_eq!(unmapped_word(0x0570_1234), 0x1234_1234);
        assert_eq!(unmapped_word(0x0000_0000), 0x0000_0000);
        assert_eq!(unmapped_word(0xFFFF_FFFF), 0xFFFF_FFFF);
    }

    #[test]
    fn every_window_boundary_decodes() {
        assert_eq!(decode(0x0000_0000), Mapped::Unmapped);
        assert_eq!(decode(0x04FF_FFFF), Mapped::Unmapped);
        assert_eq!(decode(0x0500_0000), Mapped::Dd(DdRegion::CommandRegs));
        assert_eq!(decode(0x0500_03FF), Mapped::Dd(DdRegion::CommandRegs));
        assert_eq!(decode(0x0500_0400), Mapped::Dd(DdRegion::SectorBuf));
        assert_eq!(decode(0x0500_0500), Mapped::Dd(DdRegion::Control));
        assert_eq!(decode(0x0500_0580), Mapped::Dd(DdRegion::MotorSeek));
        assert_eq!(decode(0x0500_05C0), Mapped::Unmapped);
        assert_eq!(decode(0x0600_0000), Mapped::Dd(DdRegion::IplRom));
        assert_eq!(decode(0x063F_FFFF), Mapped::Dd(DdRegion::IplRom));
        assert_eq!(decode(0x0640_0000), Mapped::Unmapped);
        assert_eq!(decode(0x0800_0000), Mapped::CartSave);
        assert_eq!(decode(0x0FFF_FFFF), Mapped::CartSave);
        assert_eq!(decode(0x1000_0000), Mapped::CartRom);
        assert_eq!(decode(0x13FE_FFFF), Mapped::CartRom);
        assert_eq!(decode(0x13FF_0000), Mapped::RomViewer);
        assert_eq!(decode(0x13FF_FFFF), Mapped::RomViewer);
        assert_eq!(decode(0x1FFF_0000), Mapped::Sc64Regs);
        assert_eq!(decode(0x1FFF_000F), Mapped::Sc64Regs);
        assert_eq!(decode(0x1FFF_0010), Mapped::Unmapped);
        assert_eq!(decode(0x7FFF_FFFF), Mapped::Unmapped);
        assert_eq!(decode(0xFFFF_FFFF), Mapped::Unmapped);
    }
}
