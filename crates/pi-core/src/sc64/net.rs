//! Network bridge for the SC64 debug channel.
//!
//! Owns at most one endpoint: an outbound client connection or a
//! listening server with any number of accepted peers. A single worker
//! thread services the endpoint; it talks to the guest-facing side
//! through two capacity-1 channels (guest → worker: outbound sends,
//! worker → guest: inbound packets). Because one thread owns the socket
//! and both channel endpoints carry owned payloads, an outbound send can
//! never interleave with an inbound buffer overwrite.
//!
//! TCP stands in for the original reliable-datagram transport; frames on
//! the wire are a 4-byte big-endian length prefix followed by at most 512
//! payload bytes.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{header_create, NetType};

/// Staging/payload capacity, shared with the command engine.
pub const STAGING_SIZE: usize = 512;

/// Bounded poll interval for the worker loop and guest-visible stalls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("bad port string: {0:?}")]
    BadPort(String),
    #[error("host string is not valid UTF-8")]
    BadHost,
}

/// An inbound event ready for the guest: the protocol header words plus
/// the owned payload destined for the staging buffer.
#[derive(Debug)]
pub struct Inbound {
    pub header: u32,
    pub len: u32,
    pub payload: Vec<u8>,
}

enum WorkerCmd {
    Send(Vec<u8>),
}

struct Worker {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    cmd_tx: SyncSender<WorkerCmd>,
}

/// Shared state handed to the worker thread.
struct WorkerCtx {
    inbound_tx: SyncSender<Inbound>,
    cmd_rx: Receiver<WorkerCmd>,
    rx_ready: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerCtx {
    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

pub struct NetBridge {
    worker: Option<Worker>,
    inbound_rx: Option<Receiver<Inbound>>,
    rx_ready: Arc<AtomicBool>,
}

impl NetBridge {
    pub fn new() -> Self {
        Self {
            worker: None,
            inbound_rx: None,
            rx_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether an inbound event is waiting to be consumed.
    pub fn rx_ready(&self) -> bool {
        self.rx_ready.load(Ordering::SeqCst)
    }

    /// Consume the pending inbound event, if any. Clears the ready flag.
    pub fn take_inbound(&mut self) -> Option<Inbound> {
        let rx = self.inbound_rx.as_ref()?;
        match rx.try_recv() {
            Ok(ev) => {
                self.rx_ready.store(false, Ordering::SeqCst);
                Some(ev)
            }
            Err(_) => None,
        }
    }

    /// Connect to `host[:port]`, given as a NUL-terminated string in the
    /// transfer payload. Any previous endpoint is torn down first. On
    /// success an inbound event carrying the host string is posted.
    pub fn connect(&mut self, payload: &[u8]) -> Result<(), NetError> {
        self.teardown();
        let spec = payload_string(payload)?;
        let (host, port) = match spec.split_once(':') {
            Some((h, p)) => (
                h.to_string(),
                p.parse::<u16>().map_err(|_| NetError::BadPort(p.to_string()))?,
            ),
            None => (spec, 0),
        };
        log::info!("Connecting to {}:{}...", host, port);
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        log::info!("Connected to {}:{}", host, port);

        let (inbound_tx, inbound_rx) = mpsc::sync_channel(1);
        let (cmd_tx, cmd_rx) = mpsc::sync_channel(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        // The connection event is the first thing the guest polls out:
        // payload is the connected host string.
        let host_bytes = host.into_bytes();
        let ev = Inbound {
            header: header_create(NetType::Connect, host_bytes.len() as u32),
            len: host_bytes.len() as u32,
            payload: host_bytes,
        };
        // Channel is freshly created, the slot is free.
        let _ = inbound_tx.try_send(ev);
        self.rx_ready.store(true, Ordering::SeqCst);

        let ctx = WorkerCtx {
            inbound_tx,
            cmd_rx,
            rx_ready: self.rx_ready.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = thread::spawn(move || client_loop(stream, ctx));
        self.worker = Some(Worker {
            handle,
            shutdown,
            cmd_tx,
        });
        self.inbound_rx = Some(inbound_rx);
        Ok(())
    }

    /// Bind a listening server on the port given as a decimal string in
    /// the transfer payload. Any previous endpoint is torn down first.
    pub fn start_server(&mut self, payload: &[u8]) -> Result<(), NetError> {
        self.teardown();
        let text = payload_string(payload)?;
        let port: u16 = text
            .trim()
            .parse()
            .map_err(|_| NetError::BadPort(text.clone()))?;
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        log::info!("Debug server listening on port {}", port);

        let (inbound_tx, inbound_rx) = mpsc::sync_channel(1);
        let (cmd_tx, cmd_rx) = mpsc::sync_channel(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = WorkerCtx {
            inbound_tx,
            cmd_rx,
            rx_ready: self.rx_ready.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = thread::spawn(move || server_loop(listener, ctx));
        self.worker = Some(Worker {
            handle,
            shutdown,
            cmd_tx,
        });
        self.inbound_rx = Some(inbound_rx);
        Ok(())
    }

    /// Hand a payload to the worker: written to the connected peer, or
    /// broadcast to every accepted peer of a server endpoint. No-op
    /// without an endpoint.
    pub fn send(&mut self, payload: Vec<u8>) {
        let Some(worker) = self.worker.as_ref() else {
            log::debug!("send with no active endpoint, dropped");
            return;
        };
        if worker.cmd_tx.send(WorkerCmd::Send(payload)).is_err() {
            log::warn!("network worker is gone, send dropped");
        }
    }

    /// Stop the worker and release the endpoint. Blocks only for local
    /// resource release (no network round-trip).
    pub fn teardown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown.store(true, Ordering::SeqCst);
            drop(worker.cmd_tx);
            if worker.handle.join().is_err() {
                log::warn!("network worker panicked during teardown");
            }
        }
        self.inbound_rx = None;
        self.rx_ready.store(false, Ordering::SeqCst);
    }
}

impl Default for NetBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NetBridge {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Decode the NUL-terminated string at the start of a transfer payload.
fn payload_string(payload: &[u8]) -> Result<String, NetError> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    std::str::from_utf8(&payload[..end])
        .map(str::to_string)
        .map_err(|_| NetError::BadHost)
}

/// Push an inbound event to the guest side, blocking in bounded steps
/// while the slot is occupied. Guest sends keep being serviced in the
/// meantime so a blocking `NetBridge::send` cannot deadlock against a
/// full inbound slot. Returns false when the endpoint should shut down.
fn deliver(ctx: &WorkerCtx, mut ev: Inbound, mut flush_send: impl FnMut(Vec<u8>)) -> bool {
    loop {
        if ctx.shutting_down() {
            return false;
        }
        match ctx.inbound_tx.try_send(ev) {
            Ok(()) => {
                ctx.rx_ready.store(true, Ordering::SeqCst);
                return true;
            }
            Err(TrySendError::Full(back)) => {
                ev = back;
                while let Ok(WorkerCmd::Send(payload)) = ctx.cmd_rx.try_recv() {
                    flush_send(payload);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

/// Read whatever is available into the accumulator. Ok(false) = EOF.
fn read_chunk(stream: &mut TcpStream, acc: &mut Vec<u8>) -> io::Result<bool> {
    let mut tmp = [0u8; 1024];
    match stream.read(&mut tmp) {
        Ok(0) => Ok(false),
        Ok(n) => {
            acc.extend_from_slice(&tmp[..n]);
            Ok(true)
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Pull one complete frame out of the accumulator, if present.
fn extract_frame(acc: &mut Vec<u8>) -> Option<Vec<u8>> {
    if acc.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([acc[0], acc[1], acc[2], acc[3]]) as usize;
    if len > STAGING_SIZE {
        // Framing is untrustworthy past this point; drop the stream data.
        log::warn!(
            "dropping oversized frame ({} bytes, staging buffer is {})",
            len,
            STAGING_SIZE
        );
        acc.clear();
        return None;
    }
    if acc.len() < 4 + len {
        return None;
    }
    let payload = acc[4..4 + len].to_vec();
    acc.drain(..4 + len);
    Some(payload)
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    let mut off = 0;
    while off < frame.len() {
        match stream.write(&frame[off..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => off += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn inbound_packet(payload: Vec<u8>) -> Inbound {
    let len = payload.len() as u32;
    log::debug!("received packet of length {}", len);
    Inbound {
        header: header_create(NetType::Send, len),
        len,
        payload,
    }
}

fn client_loop(mut stream: TcpStream, ctx: WorkerCtx) {
    let mut acc = Vec::new();
    loop {
        if ctx.shutting_down() {
            return;
        }
        // Outbound first, so guest sends are never starved by traffic.
        match ctx.cmd_rx.try_recv() {
            Ok(WorkerCmd::Send(payload)) => {
                if let Err(e) = write_frame(&mut stream, &payload) {
                    log::warn!("send failed: {}", e);
                    return;
                }
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return,
        }
        match read_chunk(&mut stream, &mut acc) {
            Ok(true) => {}
            Ok(false) => {
                log::info!("peer closed the connection");
                return;
            }
            Err(e) => {
                log::warn!("receive failed: {}", e);
                return;
            }
        }
        while let Some(payload) = extract_frame(&mut acc) {
            let ev = inbound_packet(payload);
            let alive = deliver(&ctx, ev, |p| {
                if let Err(e) = write_frame(&mut stream, &p) {
                    log::warn!("send failed: {}", e);
                }
            });
            if !alive {
                return;
            }
        }
    }
}

fn broadcast(peers: &mut Vec<TcpStream>, payload: &[u8]) {
    peers.retain_mut(|peer| match write_frame(peer, payload) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("broadcast to peer failed: {}", e);
            false
        }
    });
}

fn server_loop(listener: TcpListener, ctx: WorkerCtx) {
    let mut peers: Vec<TcpStream> = Vec::new();
    let mut accs: Vec<Vec<u8>> = Vec::new();
    loop {
        if ctx.shutting_down() {
            return;
        }
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                log::info!("peer connected: {}", peer_addr);
                if stream.set_nonblocking(true).is_ok() {
                    peers.push(stream);
                    accs.push(Vec::new());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                log::warn!("accept failed: {}", e);
                return;
            }
        }
        match ctx.cmd_rx.try_recv() {
            Ok(WorkerCmd::Send(payload)) => broadcast(&mut peers, &payload),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => return,
        }
        let mut inbound = Vec::new();
        let mut i = 0;
        while i < peers.len() {
            match read_chunk(&mut peers[i], &mut accs[i]) {
                Ok(true) => {
                    while let Some(payload) = extract_frame(&mut accs[i]) {
                        inbound.push(payload);
                    }
                    i += 1;
                }
                Ok(false) | Err(_) => {
                    log::info!("peer disconnected");
                    peers.swap_remove(i);
                    accs.swap_remove(i);
                }
            }
        }
        for payload in inbound {
            let ev = inbound_packet(payload);
            if !deliver(&ctx, ev, |p| broadcast(&mut peers, &p)) {
                return;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_inbound(bridge: &mut NetBridge, timeout: Duration) -> Option<Inbound> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(ev) = bridge.take_inbound() {
                return Some(ev);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn connect_failure_leaves_no_endpoint() {
        let mut bridge = NetBridge::new();
        // Port 1 on loopback should refuse quickly.
        assert!(bridge.connect(b"127.0.0.1:1\0").is_err());
        assert!(!bridge.rx_ready());
        bridge.send(b"dropped".to_vec()); // no endpoint: must not block or panic
    }

    #[test]
    fn bad_port_string_is_rejected() {
        let mut bridge = NetBridge::new();
        assert!(matches!(
            bridge.start_server(b"not-a-port\0"),
            Err(NetError::BadPort(_))
        ));
        assert!(matches!(
            bridge.connect(b"localhost:hi\0"),
            Err(NetError::BadPort(_))
        ));
    }

    #[test]
    fn connect_posts_host_string_event() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut server = NetBridge::new();
        server.start_server(b"47391\0").expect("bind");

        let mut client = NetBridge::new();
        // Sending before any peer exists must not crash or deadlock.
        server.send(b"nobody listening".to_vec());

        client.connect(b"127.0.0.1:47391\0").expect("connect");
        assert!(client.rx_ready());
        let ev = client.take_inbound().expect("connect event");
        assert_eq!(super::super::header_type(ev.header), NetType::Connect as u32);
        assert_eq!(ev.payload, b"127.0.0.1");
        assert!(!client.rx_ready());
    }

    #[test]
    fn client_send_reaches_server_and_back() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut server = NetBridge::new();
        server.start_server(b"47392\0").expect("bind");
        let mut client = NetBridge::new();
        client.connect(b"127.0.0.1:47392\0").expect("connect");
        client.take_inbound().expect("connect event");

        client.send(b"ping".to_vec());
        let ev = wait_inbound(&mut server, Duration::from_secs(5)).expect("server rx");
        assert_eq!(ev.payload, b"ping");
        assert_eq!(ev.len, 4);
        assert_eq!(super::super::header_type(ev.header), NetType::Send as u32);

        // Broadcast back to the connected peer.
        server.send(b"pong".to_vec());
        let ev = wait_inbound(&mut client, Duration::from_secs(5)).expect("client rx");
        assert_eq!(ev.payload, b"pong");

        client.teardown();
        server.teardown();
        assert!(!server.rx_ready());
    }

    #[test]
    fn frame_extraction_handles_partials_and_oversize() {
        let mut acc = vec![0, 0, 0, 2, b'h'];
        assert!(extract_frame(&mut acc).is_none()); // payload incomplete
        acc.push(b'i');
        assert_eq!(extract_frame(&mut acc).unwrap(), b"hi");
        assert!(acc.is_empty());

        let mut acc = Vec::new();
        acc.extend_from_slice(&(1024u32).to_be_bytes());
        acc.extend_from_slice(&[0u8; 8]);
        assert!(extract_frame(&mut acc).is_none());
        assert!(acc.is_empty()); // stream data discarded after desync
    }
}
