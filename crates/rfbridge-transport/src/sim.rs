//! Software stand-in for an attached microcontroller.
//!
//! The simulated device plays the firmware side of the wire protocol: it
//! acknowledges command chunks with `:next:`/`:success:` and, from its own
//! timer thread, emits sensor events and command polls as fragmented frames.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::SerialLink;

// Mirrors the firmware: end-of-packet marker and acknowledgement tokens.
const SENTINEL: u8 = 0x17;
const TOKEN_NEXT: &[u8] = b":next:";
const TOKEN_SUCCESS: &[u8] = b":success:";
const MAX_FRAGMENTS: usize = 10;

/// Behaviour of the simulated device.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Name reported by [`SerialLink::name`].
    pub name: String,
    /// Interval between sensor events. `Duration::ZERO` disables events.
    pub event_period: Duration,
    /// Interval between command polls. `Duration::ZERO` disables polls.
    pub poll_period: Duration,
    /// Radio channels the generator reports on.
    pub channels: Vec<u8>,
    /// Payload bytes per generated fragment.
    pub fragment_size: usize,
    /// Seed for the sensor value generator. `None` uses OS entropy.
    pub seed: Option<u64>,
}

impl SimConfig {
    /// A device that never talks on its own; only answers writes.
    pub fn quiet() -> Self {
        Self {
            event_period: Duration::ZERO,
            poll_period: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "sim0".to_string(),
            event_period: Duration::from_secs(5),
            poll_period: Duration::from_secs(2),
            channels: vec![1, 2, 3],
            fragment_size: 16,
            seed: None,
        }
    }
}

#[derive(Default)]
struct Inbox {
    lines: VecDeque<Bytes>,
    replies: VecDeque<Bytes>,
    commands: Vec<Bytes>,
}

#[derive(Default)]
struct Shared {
    inbox: Mutex<Inbox>,
    ready: Condvar,
}

impl Shared {
    fn push_line(&self, line: Bytes) {
        self.inbox.lock().lines.push_back(line);
        self.ready.notify_all();
    }
}

/// Inspection and fault-injection handle for a [`SimulatedDevice`].
///
/// Remains usable after the device itself has been moved into a session.
#[derive(Clone)]
pub struct SimProbe {
    shared: Arc<Shared>,
}

impl SimProbe {
    /// Queue a raw line for the host to read, as if the device sent it.
    pub fn push_line(&self, line: impl Into<Bytes>) {
        self.shared.push_line(line.into());
    }

    /// Answer the next write with `token` instead of the normal reply.
    pub fn script_reply(&self, token: impl Into<Bytes>) {
        self.shared.inbox.lock().replies.push_back(token.into());
    }

    /// Complete commands received so far, newline included.
    pub fn received_commands(&self) -> Vec<Bytes> {
        self.shared.inbox.lock().commands.clone()
    }

    /// Lines queued for the host that have not been read yet.
    pub fn pending_lines(&self) -> usize {
        self.shared.inbox.lock().lines.len()
    }
}

/// Simulated microcontroller implementing [`SerialLink`].
pub struct SimulatedDevice {
    name: String,
    shared: Arc<Shared>,
    receiving: BytesMut,
    stop: Option<Sender<()>>,
    generator: Option<JoinHandle<()>>,
    closed: bool,
}

impl SimulatedDevice {
    /// Create the device and start its event generator.
    pub fn open(config: SimConfig) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let mut device = Self {
            name: config.name.clone(),
            shared: Arc::clone(&shared),
            receiving: BytesMut::new(),
            stop: None,
            generator: None,
            closed: false,
        };

        if !config.event_period.is_zero() || !config.poll_period.is_zero() {
            let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
            let thread_name = format!("{}-generator", config.name);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let mut generator = Generator::new(config);
                    loop {
                        let wait = generator.until_next(Instant::now());
                        match stop_rx.recv_timeout(wait) {
                            Err(RecvTimeoutError::Timeout) => {
                                for line in generator.due(Instant::now()) {
                                    shared.push_line(line);
                                }
                            }
                            _ => break,
                        }
                    }
                })
                .map_err(|source| TransportError::Spawn {
                    name: thread_name,
                    source,
                })?;
            device.stop = Some(stop_tx);
            device.generator = Some(handle);
        }

        debug!(name = %device.name, "simulated device opened");
        Ok(device)
    }

    /// Handle for inspecting traffic and injecting lines.
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl SerialLink for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.receiving.extend_from_slice(data);

        let complete = data.last() == Some(&b'\n');
        let mut inbox = self.shared.inbox.lock();
        if complete {
            let command = self.receiving.split().freeze();
            trace!(name = %self.name, size = command.len(), "command received");
            inbox.commands.push(command);
        }
        let reply = inbox.replies.pop_front().unwrap_or_else(|| {
            Bytes::from_static(if complete { TOKEN_SUCCESS } else { TOKEN_NEXT })
        });
        inbox.lines.push_back(reply);
        drop(inbox);
        self.shared.ready.notify_all();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn flush_input(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.shared.inbox.lock().lines.clear();
        Ok(())
    }

    fn flush_output(&mut self) -> Result<()> {
        self.ensure_open()
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        let mut inbox = self.shared.inbox.lock();
        loop {
            if let Some(line) = inbox.lines.pop_front() {
                return Ok(Some(line));
            }
            if self.shared.ready.wait_until(&mut inbox, deadline).timed_out() {
                return Ok(inbox.lines.pop_front());
            }
        }
    }

    fn bytes_available(&mut self) -> Result<usize> {
        self.ensure_open()?;
        let inbox = self.shared.inbox.lock();
        Ok(inbox.lines.iter().map(|line| line.len() + 1).sum())
    }

    fn close(&mut self) -> Result<()> {
        self.stop.take();
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
        if !self.closed {
            debug!(name = %self.name, "simulated device closed");
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Timer state for the background event/poll generator.
struct Generator {
    config: SimConfig,
    rng: StdRng,
    next_event: Option<Instant>,
    next_poll: Option<Instant>,
    poll_cursor: usize,
}

impl Generator {
    fn new(config: SimConfig) -> Self {
        let now = Instant::now();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_event = (!config.event_period.is_zero()).then(|| now + config.event_period);
        let next_poll = (!config.poll_period.is_zero()).then(|| now + config.poll_period);
        Self {
            config,
            rng,
            next_event,
            next_poll,
            poll_cursor: 0,
        }
    }

    fn until_next(&self, now: Instant) -> Duration {
        [self.next_event, self.next_poll]
            .into_iter()
            .flatten()
            .min()
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or(Duration::from_secs(1))
    }

    fn due(&mut self, now: Instant) -> Vec<Bytes> {
        let mut lines = Vec::new();
        if self.config.channels.is_empty() {
            return lines;
        }

        if let Some(at) = self.next_event {
            if at <= now {
                let channel = self.config.channels[self.rng.gen_range(0..self.config.channels.len())];
                let payload = format!(
                    "tp ev,t {:.2},h {:.2},b {:.2}",
                    self.rng.gen_range(18.0..26.0),
                    self.rng.gen_range(40.0..65.0),
                    self.rng.gen_range(3.8..4.2),
                );
                lines.extend(fragment_packet(channel, payload.as_bytes(), self.config.fragment_size));
                self.next_event = Some(now + self.config.event_period);
            }
        }

        if let Some(at) = self.next_poll {
            if at <= now {
                let channel = self.config.channels[self.poll_cursor % self.config.channels.len()];
                self.poll_cursor = self.poll_cursor.wrapping_add(1);
                lines.extend(fragment_packet(channel, b"tp rq", self.config.fragment_size));
                self.next_poll = Some(now + self.config.poll_period);
            }
        }

        lines
    }
}

/// Split a packet payload into numbered fragment frames for `channel`.
///
/// The last fragment carries the sentinel byte. Fragment sizes grow if the
/// payload would otherwise need more than ten single-digit sequence numbers.
pub fn fragment_packet(channel: u8, payload: &[u8], fragment_size: usize) -> Vec<Bytes> {
    let size = fragment_size
        .max(1)
        .max(payload.len().div_ceil(MAX_FRAGMENTS));
    let mut parts: Vec<&[u8]> = payload.chunks(size).collect();
    if parts.is_empty() {
        parts.push(&[]);
    }
    let last = parts.len() - 1;

    parts
        .into_iter()
        .enumerate()
        .map(|(seq, part)| {
            let mut frame = BytesMut::with_capacity(part.len() + 3);
            frame.put_u8(b'0' + channel % 10);
            frame.put_u8(b'0' + seq as u8);
            frame.put_slice(part);
            if seq == last {
                frame.put_u8(SENTINEL);
            }
            frame.freeze()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_answers_next_then_success() {
        let mut device = SimulatedDevice::open(SimConfig::quiet()).unwrap();
        let probe = device.probe();

        device.write(b"1c").unwrap();
        let first = device.read_line(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(first.as_ref(), b":next:");

        device.write(b"on\n").unwrap();
        let second = device.read_line(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(second.as_ref(), b":success:");

        assert_eq!(probe.received_commands(), vec![Bytes::from_static(b"1con\n")]);
    }

    #[test]
    fn read_line_times_out_with_none() {
        let mut device = SimulatedDevice::open(SimConfig::quiet()).unwrap();
        let start = Instant::now();
        let line = device.read_line(Duration::from_millis(30)).unwrap();
        assert!(line.is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn scripted_reply_overrides_protocol_token() {
        let mut device = SimulatedDevice::open(SimConfig::quiet()).unwrap();
        device.probe().script_reply(&b":fail:"[..]);

        device.write(b"2cx\n").unwrap();
        let line = device.read_line(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(line.as_ref(), b":fail:");
    }

    #[test]
    fn flush_input_discards_pending_lines() {
        let mut device = SimulatedDevice::open(SimConfig::quiet()).unwrap();
        let probe = device.probe();
        probe.push_line(&b"10tp ev\x17"[..]);
        assert_eq!(device.bytes_available().unwrap(), 9);

        device.flush_input().unwrap();
        assert_eq!(probe.pending_lines(), 0);
        assert_eq!(device.bytes_available().unwrap(), 0);
    }

    #[test]
    fn closed_device_rejects_io() {
        let mut device = SimulatedDevice::open(SimConfig::quiet()).unwrap();
        device.close().unwrap();
        assert!(matches!(device.write(b"x"), Err(TransportError::Closed)));
        assert!(matches!(
            device.read_line(Duration::from_millis(1)),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn fragment_packet_numbers_and_terminates() {
        let frames = fragment_packet(4, b"tp ev,t 21.50", 5);
        let rendered: Vec<&[u8]> = frames.iter().map(|f| f.as_ref()).collect();
        assert_eq!(
            rendered,
            vec![&b"40tp ev"[..], &b"41,t 21"[..], &b"42.50\x17"[..]]
        );
    }

    #[test]
    fn fragment_packet_caps_fragment_count() {
        let payload = vec![b'x'; 95];
        let frames = fragment_packet(1, &payload, 1);
        assert_eq!(frames.len(), 10);
        assert_eq!(frames[9].last(), Some(&SENTINEL));
    }

    #[test]
    fn generator_emits_events_and_polls() {
        let config = SimConfig {
            event_period: Duration::from_millis(20),
            poll_period: Duration::from_millis(20),
            channels: vec![5],
            seed: Some(7),
            ..SimConfig::default()
        };
        let mut device = SimulatedDevice::open(config).unwrap();

        let mut seen_event = false;
        let mut seen_poll = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && !(seen_event && seen_poll) {
            if let Some(line) = device.read_line(Duration::from_millis(50)).unwrap() {
                assert_eq!(line[0], b'5');
                let text = String::from_utf8_lossy(&line);
                seen_event |= text.starts_with("50tp ev");
                seen_poll |= line.as_ref() == b"50tp rq\x17";
            }
        }
        device.close().unwrap();

        assert!(seen_event, "expected a generated event");
        assert!(seen_poll, "expected a generated poll");
    }
}
