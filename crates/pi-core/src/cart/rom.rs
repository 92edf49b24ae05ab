use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{read_be16, read_be32, write_be16, write_be32};

/// ROM byte order, detected from the first 4 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomFormat {
    /// .z64 — big-endian (native byte order). Magic: 0x80371240
    BigEndian,
    /// .v64 — byte-swapped (each 16-bit pair flipped). Magic: 0x37804012
    ByteSwapped,
    /// .n64 — little-endian (each 32-bit word reversed). Magic: 0x40123780
    LittleEndian,
}

#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unknown ROM format (magic bytes: {0:02X} {1:02X} {2:02X} {3:02X})")]
    UnknownFormat(u8, u8, u8, u8),
    #[error("ROM too small (need at least 64 bytes for header, got {0})")]
    TooSmall(usize),
}

fn detect_format(magic: [u8; 4]) -> Result<RomFormat, RomError> {
    match magic {
        [0x80, 0x37, 0x12, 0x40] => Ok(RomFormat::BigEndian),
        [0x37, 0x80, 0x40, 0x12] => Ok(RomFormat::ByteSwapped),
        [0x40, 0x12, 0x37, 0x80] => Ok(RomFormat::LittleEndian),
        [a, b, c, d] => Err(RomError::UnknownFormat(a, b, c, d)),
    }
}

fn normalize(data: &mut [u8], format: RomFormat) {
    match format {
        RomFormat::BigEndian => {}
        RomFormat::ByteSwapped => {
            for pair in data.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
        }
        RomFormat::LittleEndian => {
            for word in data.chunks_exact_mut(4) {
                word.reverse();
            }
        }
    }
}

/// Cartridge ROM, also the backing for the SC64's SDRAM mapping.
///
/// On a real SC64 the "ROM" window is SDRAM, so the store is writable;
/// whether bus-level writes reach it is gated by the SC64's
/// `sdram_writable` config option.
pub struct Rom {
    data: Vec<u8>,
}

impl Rom {
    /// Load a ROM image, normalizing byte-swapped and little-endian dumps
    /// to native big-endian order.
    pub fn load(path: &Path) -> Result<Self, RomError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.len() < 0x40 {
            return Err(RomError::TooSmall(data.len()));
        }
        let format = detect_format([data[0], data[1], data[2], data[3]])?;
        normalize(&mut data, format);
        log::info!("Loaded ROM: {} bytes (format: {:?})", data.len(), format);
        Ok(Self { data })
    }

    /// Wrap already-normalized big-endian bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(addr: u32) -> usize {
        (addr & 0x0FFF_FFFF) as usize
    }

    pub fn read_u8(&self, addr: u32) -> u8 {
        let off = Self::offset(addr);
        if off < self.data.len() {
            self.data[off]
        } else {
            0
        }
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        read_be16(&self.data, Self::offset(addr))
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        read_be32(&self.data, Self::offset(addr))
    }

    pub fn write_u8(&mut self, addr: u32, val: u8) {
        let off = Self::offset(addr);
        if off < self.data.len() {
            self.data[off] = val;
        }
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) {
        write_be16(&mut self.data, Self::offset(addr), val);
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) {
        write_be32(&mut self.data, Self::offset(addr), val);
    }
}
