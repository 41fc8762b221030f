use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{info, warn};

const FEEDPORT_ENV_VAR: &str = "AGENT_STAGE_FEEDPORT";
const FEEDPORT_PORT_ENV_VAR: &str = "AGENT_STAGE_FEEDPORT_PORT";
const FEEDPORT_DEFAULT_PORT: u16 = 47401;
const MAX_PENDING_EVENT_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT: usize = 64 * 1024;
const EVENT_PREFIX: &str = "E ";
const TELEMETRY_PREFIX: &str = "T ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FeedPortConfig {
    enabled: bool,
    port: u16,
}

impl FeedPortConfig {
    fn from_env() -> Self {
        let enabled = parse_enabled_flag(std::env::var(FEEDPORT_ENV_VAR).ok().as_deref());
        let port = match std::env::var(FEEDPORT_PORT_ENV_VAR).ok().as_deref() {
            Some(value) => match value.parse::<u16>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    warn!(
                        value,
                        fallback_port = FEEDPORT_DEFAULT_PORT,
                        "feedport_invalid_port_using_default"
                    );
                    FEEDPORT_DEFAULT_PORT
                }
            },
            None => FEEDPORT_DEFAULT_PORT,
        };
        Self { enabled, port }
    }
}

/// Outbound line classes. Event lines carry the domain event feed and are
/// never evicted by telemetry pressure; telemetry frames are lossy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutboundClass {
    Event,
    Telemetry,
}

#[derive(Debug)]
struct OutboundChunk {
    class: OutboundClass,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct OutboundChunkState {
    chunk: OutboundChunk,
    written: usize,
}

#[derive(Debug)]
struct ClientConn {
    stream: TcpStream,
    read_buf: Vec<u8>,
    active_chunk: Option<OutboundChunkState>,
    queued_chunks: VecDeque<OutboundChunk>,
    queued_event_bytes: usize,
    queued_telemetry_bytes: usize,
}

impl ClientConn {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            active_chunk: None,
            queued_chunks: VecDeque::new(),
            queued_event_bytes: 0,
            queued_telemetry_bytes: 0,
        }
    }
}

#[derive(Debug)]
struct FeedTransport {
    listener: TcpListener,
    bound_port: u16,
    clients: Vec<ClientConn>,
}

#[derive(Debug)]
enum FeedPortMode {
    Disabled,
    Enabled(FeedTransport),
}

/// Localhost-only, nonblocking line transport for the event feed. Inbound
/// lines are raw protocol events; outbound lines are prefixed `E ` (domain
/// events) or `T ` (telemetry frames).
#[derive(Debug)]
pub struct FeedPort {
    mode: FeedPortMode,
}

impl FeedPort {
    pub fn from_env() -> Self {
        let config = FeedPortConfig::from_env();
        let mode = if config.enabled {
            match FeedTransport::bind_localhost(config.port) {
                Ok(transport) => {
                    info!(
                        line = %ready_line_text(transport.bound_port),
                        "feedport_ready_bound"
                    );
                    FeedPortMode::Enabled(transport)
                }
                Err(error) => {
                    warn!(error = %error, port = config.port, "feedport_bind_failed_disabled");
                    FeedPortMode::Disabled
                }
            }
        } else {
            FeedPortMode::Disabled
        };
        Self { mode }
    }

    pub fn disabled() -> Self {
        Self {
            mode: FeedPortMode::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, FeedPortMode::Enabled(_))
    }

    pub fn connected_clients(&self) -> usize {
        match &self.mode {
            FeedPortMode::Enabled(transport) => transport.clients.len(),
            FeedPortMode::Disabled => 0,
        }
    }

    /// Accepts pending clients, drains complete inbound lines into `out`,
    /// and flushes any queued outbound bytes.
    pub fn poll_lines(&mut self, out: &mut Vec<String>) {
        if let FeedPortMode::Enabled(transport) = &mut self.mode {
            transport.poll_lines(out);
        }
    }

    pub fn send_event_lines(&mut self, lines: &[String]) {
        if let FeedPortMode::Enabled(transport) = &mut self.mode {
            transport.send_event_lines(lines);
        }
    }

    pub fn send_telemetry_line(&mut self, line: &str) {
        if let FeedPortMode::Enabled(transport) = &mut self.mode {
            transport.send_telemetry_line(line);
        }
    }
}

impl FeedTransport {
    fn bind_localhost(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(localhost_bind_addr(port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            bound_port,
            clients: Vec::new(),
        })
    }

    fn poll_lines(&mut self, out: &mut Vec<String>) {
        self.accept_pending_clients();
        self.poll_client_lines(out);
        self.flush_all_client_outbound();
    }

    fn accept_pending_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(error) = stream.set_nonblocking(true) {
                        warn!(error = %error, "feedport_client_nonblocking_failed");
                        continue;
                    }
                    if let Err(error) = stream.set_nodelay(true) {
                        warn!(error = %error, "feedport_client_nodelay_failed");
                    }
                    let mut client = ClientConn::new(stream);
                    enqueue_event_line(&mut client, &ready_line_text(self.bound_port));
                    self.clients.push(client);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) => {
                    warn!(error = %error, "feedport_accept_failed");
                    break;
                }
            }
        }
    }

    fn poll_client_lines(&mut self, out: &mut Vec<String>) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let mut disconnected = false;
            {
                let client = &mut self.clients[index];
                let mut chunk = [0u8; 1024];
                loop {
                    match client.stream.read(&mut chunk) {
                        Ok(0) => {
                            disconnected = true;
                            break;
                        }
                        Ok(bytes_read) => {
                            client.read_buf.extend_from_slice(&chunk[..bytes_read]);
                            drain_complete_lines(&mut client.read_buf, out);
                        }
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                        Err(error) => {
                            warn!(error = %error, "feedport_client_read_failed");
                            disconnected = true;
                            break;
                        }
                    }
                }
            }

            if disconnected {
                self.clients.swap_remove(index);
                info!(remaining = self.clients.len(), "feedport_client_disconnected");
            } else {
                index += 1;
            }
        }
    }

    fn send_event_lines(&mut self, lines: &[String]) {
        for client in &mut self.clients {
            for line in lines {
                enqueue_event_line(client, line);
            }
        }
        self.flush_all_client_outbound();
    }

    fn send_telemetry_line(&mut self, line: &str) {
        for client in &mut self.clients {
            enqueue_telemetry_line(client, line);
        }
        self.flush_all_client_outbound();
    }

    fn flush_all_client_outbound(&mut self) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let flush_result = {
                let client = &mut self.clients[index];
                flush_pending_chunks(
                    &mut client.active_chunk,
                    &mut client.queued_chunks,
                    &mut client.queued_event_bytes,
                    &mut client.queued_telemetry_bytes,
                    |payload| client.stream.write(payload),
                )
            };
            if let Err(error) = flush_result {
                warn!(error = %error, "feedport_client_write_failed");
                self.clients.swap_remove(index);
            } else {
                index += 1;
            }
        }
    }
}

fn localhost_bind_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn parse_enabled_flag(raw: Option<&str>) -> bool {
    matches!(raw, Some("1"))
}

fn ready_line_text(port: u16) -> String {
    format!("feedport.ready v1 port:{port}")
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop(); // newline
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        match String::from_utf8(line_bytes) {
            Ok(line) => out.push(line),
            Err(error) => warn!(error = %error, "feedport_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_tagged_payload(prefix: &str, line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(prefix.len() + line.len() + 1);
    payload.extend_from_slice(prefix.as_bytes());
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

fn enqueue_event_line(client: &mut ClientConn, line: &str) {
    enqueue_event_line_with_cap(client, line, MAX_PENDING_EVENT_BYTES_PER_CLIENT);
}

/// Event lines evict only older event lines once the cap is hit, oldest
/// first, so a slow reader loses history rather than stalling the stage.
fn enqueue_event_line_with_cap(client: &mut ClientConn, line: &str, event_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Event,
        bytes: encode_tagged_payload(EVENT_PREFIX, line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > event_cap {
        warn!(chunk_bytes, event_cap, "feedport_event_line_over_cap_dropped");
        return;
    }
    while client.queued_event_bytes.saturating_add(chunk_bytes) > event_cap {
        if !evict_oldest_queued(client, OutboundClass::Event) {
            return;
        }
    }
    client.queued_event_bytes = client.queued_event_bytes.saturating_add(chunk_bytes);
    // Event lines jump ahead of any queued telemetry.
    let insert_at = client
        .queued_chunks
        .iter()
        .position(|existing| existing.class == OutboundClass::Telemetry)
        .unwrap_or(client.queued_chunks.len());
    client.queued_chunks.insert(insert_at, chunk);
}

fn enqueue_telemetry_line(client: &mut ClientConn, line: &str) {
    enqueue_telemetry_line_with_cap(client, line, MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT);
}

fn enqueue_telemetry_line_with_cap(client: &mut ClientConn, line: &str, telemetry_cap: usize) {
    let chunk = OutboundChunk {
        class: OutboundClass::Telemetry,
        bytes: encode_tagged_payload(TELEMETRY_PREFIX, line),
    };
    let chunk_bytes = chunk.bytes.len();
    if chunk_bytes > telemetry_cap {
        return;
    }
    while client.queued_telemetry_bytes.saturating_add(chunk_bytes) > telemetry_cap {
        if !evict_oldest_queued(client, OutboundClass::Telemetry) {
            return;
        }
    }
    client.queued_telemetry_bytes = client.queued_telemetry_bytes.saturating_add(chunk_bytes);
    client.queued_chunks.push_back(chunk);
}

fn evict_oldest_queued(client: &mut ClientConn, class: OutboundClass) -> bool {
    let Some(index) = client
        .queued_chunks
        .iter()
        .position(|chunk| chunk.class == class)
    else {
        return false;
    };
    let Some(removed) = client.queued_chunks.remove(index) else {
        return false;
    };
    match class {
        OutboundClass::Event => {
            client.queued_event_bytes = client
                .queued_event_bytes
                .saturating_sub(removed.bytes.len());
        }
        OutboundClass::Telemetry => {
            client.queued_telemetry_bytes = client
                .queued_telemetry_bytes
                .saturating_sub(removed.bytes.len());
        }
    }
    true
}

fn flush_pending_chunks<F>(
    active_chunk: &mut Option<OutboundChunkState>,
    queued_chunks: &mut VecDeque<OutboundChunk>,
    queued_event_bytes: &mut usize,
    queued_telemetry_bytes: &mut usize,
    mut write_payload: F,
) -> io::Result<()>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    loop {
        if active_chunk.is_none() {
            let Some(chunk) = queued_chunks.pop_front() else {
                return Ok(());
            };
            match chunk.class {
                OutboundClass::Event => {
                    *queued_event_bytes = queued_event_bytes.saturating_sub(chunk.bytes.len());
                }
                OutboundClass::Telemetry => {
                    *queued_telemetry_bytes =
                        queued_telemetry_bytes.saturating_sub(chunk.bytes.len());
                }
            }
            *active_chunk = Some(OutboundChunkState { chunk, written: 0 });
        }

        let Some(state) = active_chunk.as_mut() else {
            return Ok(());
        };
        let remaining = &state.chunk.bytes[state.written..];
        match write_payload(remaining) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "feedport_write_zero",
                ));
            }
            Ok(bytes_written) => {
                state.written = state.written.saturating_add(bytes_written);
                if state.written >= state.chunk.bytes.len() {
                    *active_chunk = None;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(error) => return Err(error),
        }
    }
}
