//! SummerCart64 configuration/debug coprocessor.
//!
//! The guest drives a 16-byte register block: writing the command
//! register dispatches one command against the data registers, the
//! cartridge window, and the network bridge; reading it back returns the
//! status bits. The USB debug channel moves payloads between the
//! cartridge's SDRAM mapping and a 512-byte staging buffer, with network
//! traffic serviced by the bridge's worker thread.

pub mod net;

use crate::cart::Cartridge;
use net::{NetBridge, STAGING_SIZE};

/// Status bit: the last command failed (network endpoint errors).
pub const SR_CMD_ERROR: u32 = 1 << 28;
/// Status bit: a command is still executing. Dispatch here is
/// synchronous, so the guest never observes it set.
pub const SR_CPU_BUSY: u32 = 1 << 30;
/// Version register value ("SCv2").
pub const VERSION: u32 = 0x5343_7632;

/// Where the SC64 maps its SDRAM into the PI address space.
pub const SDRAM_BASE: u32 = 0x1000_0000;
/// Fixed window the legacy debug protocol transfers through.
pub const USB_DEBUG_ADDRESS: u32 = 0x0380_0000;
/// "DMA@" — leads every legacy debug transfer.
const DMA_SIGNATURE: u32 = 0x444D_4140;

/// Config-update option: allow bus writes into the SDRAM/ROM window.
const CFG_ID_SDRAM_WRITABLE: u32 = 2;

/// Receive-busy flag composed into data[0] by the rx-ready query.
const RX_BUSY_FLAG: u32 = 1 << 31;

const CMD_TX_READY: u32 = b'S' as u32;
const CMD_RX_READY: u32 = b'A' as u32;
const CMD_TX_DATA_LEGACY: u32 = b'D' as u32;
const CMD_TX_DATA: u32 = b'T' as u32;
const CMD_RX_DATA_LEGACY: u32 = b'E' as u32;
const CMD_RX_DATA: u32 = b'R' as u32;
const CMD_RX_BUSY: u32 = b'F' as u32;
const CMD_CFG_UPDATE: u32 = b'C' as u32;
const CMD_RESET: u32 = b'B' as u32;

/// Build a debug transfer header word: type in the top byte, payload
/// length in the low 24 bits.
pub fn header_create(ty: NetType, len: u32) -> u32 {
    ((ty as u32) << 24) | (len & 0x00FF_FFFF)
}

pub fn header_type(word: u32) -> u32 {
    (word >> 24) & 0xFF
}

pub fn header_size(word: u32) -> u32 {
    word & 0x00FF_FFFF
}

/// Debug transfer payload type, decoded once at the boundary. Anything
/// outside this set is a corrupt or incompatible guest-side client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetType {
    Text = 0x01,
    StartServer = 0x02,
    Connect = 0x03,
    Send = 0x05,
}

impl NetType {
    fn decode(raw: u32) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Text),
            0x02 => Some(Self::StartServer),
            0x03 => Some(Self::Connect),
            0x05 => Some(Self::Send),
            _ => None,
        }
    }
}

/// One command-register write, decoded. Invalid codes are representable
/// only as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TxReady,
    RxReady,
    /// Legacy debug transmit: signature + header live in the cartridge
    /// window at the fixed USB debug address.
    TxDataLegacy,
    /// Generic transmit: absolute address in data[0], header in data[1].
    TxData,
    /// Legacy debug receive: data[0] is SDRAM-relative.
    RxDataLegacy,
    /// Generic receive: data[0] is an absolute cartridge address.
    RxData,
    RxBusy,
    CfgUpdate,
    Reset,
    Unknown(u32),
}

impl Command {
    pub fn decode(raw: u32) -> Self {
        match raw {
            CMD_TX_READY => Self::TxReady,
            CMD_RX_READY => Self::RxReady,
            CMD_TX_DATA_LEGACY => Self::TxDataLegacy,
            CMD_TX_DATA => Self::TxData,
            CMD_RX_DATA_LEGACY => Self::RxDataLegacy,
            CMD_RX_DATA => Self::RxData,
            CMD_RX_BUSY => Self::RxBusy,
            CMD_CFG_UPDATE => Self::CfgUpdate,
            CMD_RESET => Self::Reset,
            other => Self::Unknown(other),
        }
    }
}

/// Runtime-configurable SC64 options.
#[derive(Default)]
pub struct Sc64Config {
    /// When set, bus writes to the cartridge ROM window land in SDRAM.
    pub sdram_writable: bool,
}

pub struct Sc64 {
    sr: u32,
    pub data: [u32; 2],
    tx_ready: bool,
    rx_busy: bool,
    pub config: Sc64Config,
    buffer: [u8; STAGING_SIZE],
    bridge: NetBridge,
}

impl Sc64 {
    pub fn new() -> Self {
        Self {
            sr: 0,
            data: [0, 0],
            tx_ready: true,
            rx_busy: false,
            config: Sc64Config::default(),
            buffer: [0u8; STAGING_SIZE],
            bridge: NetBridge::new(),
        }
    }

    /// Register read at `base + (addr & 0xF)`. None for unbacked offsets
    /// (the bus synthesizes the floating pattern there).
    pub fn read_reg(&self, addr: u32) -> Option<u32> {
        match addr & 0xF {
            0x0 => Some(self.sr),
            0x4 => Some(self.data[0]),
            0x8 => Some(self.data[1]),
            0xC => Some(VERSION),
            _ => None,
        }
    }

    /// Register write. Writing the command register dispatches.
    pub fn write_reg(&mut self, addr: u32, val: u32, cart: &mut Cartridge) {
        match addr & 0xF {
            0x0 => self.command(val, cart),
            0x4 => self.data[0] = val,
            0x8 => self.data[1] = val,
            _ => {}
        }
    }

    pub fn status(&self) -> u32 {
        self.sr
    }

    pub fn tx_ready(&self) -> bool {
        self.tx_ready
    }

    pub fn rx_busy(&self) -> bool {
        self.rx_busy
    }

    pub fn rx_ready(&self) -> bool {
        self.bridge.rx_ready()
    }

    /// The staging buffer contents (inbound payload landing zone).
    pub fn staging(&self) -> &[u8] {
        &self.buffer
    }

    /// Execute one command against the register file, the cartridge
    /// window, and the network bridge.
    pub fn command(&mut self, raw: u32, cart: &mut Cartridge) {
        let cmd = Command::decode(raw);
        log::debug!("SC64 command: {:?}", cmd);
        match cmd {
            Command::TxReady => {
                self.data[0] = self.tx_ready as u32;
                self.sr = 0;
            }
            Command::RxReady => {
                self.data = [0, 0];
                if let Some(ev) = self.bridge.take_inbound() {
                    let len = ev.payload.len().min(STAGING_SIZE);
                    self.buffer[..len].copy_from_slice(&ev.payload[..len]);
                    self.data[0] = ev.header;
                    self.data[1] = ev.len;
                }
                if self.rx_busy {
                    self.data[0] |= RX_BUSY_FLAG;
                }
                self.sr = 0;
            }
            Command::TxDataLegacy => self.tx_data_legacy(cart),
            Command::TxData => self.tx_data_generic(cart),
            Command::RxDataLegacy => {
                let addr = SDRAM_BASE.wrapping_add(self.data[0]);
                self.rx_data(cart, addr);
            }
            Command::RxData => {
                let addr = self.data[0];
                self.rx_data(cart, addr);
            }
            Command::RxBusy => {
                self.data[0] = self.rx_busy as u32;
                self.sr = 0;
            }
            Command::CfgUpdate => {
                match u32::from_be(self.data[0]) {
                    CFG_ID_SDRAM_WRITABLE => self.config.sdram_writable = self.data[1] != 0,
                    id => log::debug!("ignoring unknown config id {}", id),
                }
                self.sr = 0;
            }
            Command::Reset => {
                self.bridge.teardown();
                self.tx_ready = true;
                self.rx_busy = false;
                self.buffer.fill(0);
                self.sr = 0;
            }
            Command::Unknown(code) => {
                log::debug!("ignoring unknown SC64 command {:#04X}", code);
                self.sr = 0;
            }
        }
    }

    /// Legacy debug transmit. Only the fixed USB debug window is wired to
    /// the channel; other addresses are left untouched. The signature,
    /// header-vs-declared size, and payload type checks are contract
    /// violations when they fail — a broken guest build, not a runtime
    /// condition — so they terminate the emulation.
    fn tx_data_legacy(&mut self, cart: &mut Cartridge) {
        let addr = self.data[0];
        let declared = self.data[1];
        if addr != USB_DEBUG_ADDRESS {
            return;
        }
        self.tx_ready = false;
        let mut addr = addr.wrapping_add(SDRAM_BASE);
        let sig = cart.rom_read_u32(addr);
        if sig != DMA_SIGNATURE {
            panic!(
                "usb debug signature mismatch (expected 'DMA@' {:#010X}, got {:#010X})",
                DMA_SIGNATURE, sig
            );
        }
        addr = addr.wrapping_add(4);
        let hdr = cart.rom_read_u32(addr);
        if header_size(hdr) > declared {
            panic!(
                "usb debug payload larger than declared ({} > {})",
                header_size(hdr),
                declared
            );
        }
        addr = addr.wrapping_add(4);
        log::debug!("usb debug tx: header={:#010X}", hdr);
        let payload = read_payload(cart, addr, header_size(hdr) as usize);
        let ok = self.tx_dispatch(hdr, payload);
        // The transmit guard clears on every exit path; only a clean
        // dispatch clears the status word, so the error bit survives.
        self.tx_ready = true;
        if ok {
            self.sr = 0;
        }
    }

    /// Generic transmit: no in-memory signature or header, the header
    /// word arrives in data[1] and data[0] is an absolute address.
    fn tx_data_generic(&mut self, cart: &mut Cartridge) {
        let addr = self.data[0];
        let hdr = self.data[1];
        let size = header_size(hdr) as usize;
        if size > STAGING_SIZE {
            panic!(
                "usb debug payload larger than the staging buffer ({} > {})",
                size, STAGING_SIZE
            );
        }
        self.tx_ready = false;
        let payload = read_payload(cart, addr, size);
        let ok = self.tx_dispatch(hdr, payload);
        self.tx_ready = true;
        if ok {
            self.sr = 0;
        }
    }

    fn tx_dispatch(&mut self, hdr: u32, payload: Vec<u8>) -> bool {
        match NetType::decode(header_type(hdr)) {
            Some(NetType::Text) => {
                if let Ok(s) = std::str::from_utf8(&payload) {
                    log::info!("guest text: {}", s);
                }
                true
            }
            Some(NetType::StartServer) => match self.bridge.start_server(&payload) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("start-server failed: {}", e);
                    self.sr |= SR_CMD_ERROR;
                    false
                }
            },
            Some(NetType::Connect) => match self.bridge.connect(&payload) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("connect failed: {}", e);
                    self.sr |= SR_CMD_ERROR;
                    false
                }
            },
            Some(NetType::Send) => {
                self.bridge.send(payload);
                true
            }
            None => panic!("unknown usb debug datatype {}", header_type(hdr)),
        }
    }

    /// Copy staged bytes out to the cartridge window, bracketed by the
    /// receive-busy flag.
    fn rx_data(&mut self, cart: &mut Cartridge, addr: u32) {
        let len = (self.data[1] as usize).min(STAGING_SIZE);
        self.rx_busy = true;
        for (i, &byte) in self.buffer[..len].iter().enumerate() {
            cart.rom_write_u8(addr.wrapping_add(i as u32), byte);
        }
        self.rx_busy = false;
        self.sr = 0;
    }
}

impl Default for Sc64 {
    fn default() -> Self {
        Self::new()
    }
}

fn read_payload(cart: &Cartridge, addr: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| cart.rom_read_u8(addr.wrapping_add(i as u32)))
        .collect()
}
