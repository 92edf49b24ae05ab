/// ISViewer-style debug text window at 0x13FF_0000.
///
/// Homebrew writes text into the 512-byte buffer at +0x20, then writes
/// the length to +0x14 to flush it. Reading +0x04 returns a magic word so
/// guests can probe for the device.

const MAGIC: u32 = 0x4953_5664; // "ISVd"
const MAGIC_ADDR: u32 = 0x13FF_0004;
const FLUSH_TRIGGER: u32 = 0x13FF_0014;
const BUF_BASE: u32 = 0x13FF_0020;
const BUF_END: u32 = 0x13FF_021F;
const BUF_SIZE: usize = 512;

pub struct RomViewer {
    buf: [u8; BUF_SIZE],
}

impl RomViewer {
    pub fn new() -> Self {
        Self { buf: [0u8; BUF_SIZE] }
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        match addr {
            MAGIC_ADDR => MAGIC,
            _ => 0,
        }
    }

    pub fn read_u16(&self, addr: u32) -> u16 {
        self.read_u32(addr & !3) as u16
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) {
        match addr {
            BUF_BASE..=BUF_END => self.store(addr, &val.to_be_bytes()),
            FLUSH_TRIGGER => self.flush((val as usize).min(BUF_SIZE)),
            _ => {}
        }
    }

    pub fn write_u16(&mut self, addr: u32, val: u16) {
        match addr {
            BUF_BASE..=BUF_END => self.store(addr, &val.to_be_bytes()),
            FLUSH_TRIGGER => self.flush((val as usize).min(BUF_SIZE)),
            _ => {}
        }
    }

    fn store(&mut self, addr: u32, bytes: &[u8]) {
        let offset = (addr - BUF_BASE) as usize;
        for (i, &b) in bytes.iter().enumerate() {
            if offset + i < BUF_SIZE {
                self.buf[offset + i] = b;
            }
        }
    }

    fn flush(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        if let Ok(s) = std::str::from_utf8(&self.buf[..len]) {
            print!("{}", s);
        }
        self.buf[..len].fill(0);
    }
}

impl Default for RomViewer {
    fn default() -> Self {
        Self::new()
    }
}
