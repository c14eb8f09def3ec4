use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::channel::Channel;
use crate::codec::SENTINEL;
use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Idle time after which a partial packet is discarded.
pub const DEFAULT_PACKET_IDLE: Duration = Duration::from_millis(100);

const MAX_FRAGMENT_SEQ: u8 = 9;

/// Configuration for the packet reassembler.
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    /// Maximum gap between fragments of one packet. Default: 100 ms.
    pub packet_idle: Duration,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            packet_idle: DEFAULT_PACKET_IDLE,
        }
    }
}

/// What a successfully fed frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Fragment 0 opened a new packet.
    Started,
    /// A continuation fragment was appended.
    Appended,
    /// The fragment carried the sentinel; the packet is ready to drain.
    Completed,
}

#[derive(Debug)]
struct InFlight {
    payload: BytesMut,
    next_seq: u8,
    last_update: Instant,
}

/// Rebuilds per-channel packets from fragment frames.
///
/// At most one packet is in flight per channel. A partial packet never
/// blocks other channels, and one that stops receiving fragments is evicted
/// after [`ReassemblerConfig::packet_idle`].
#[derive(Debug, Default)]
pub struct Reassembler {
    config: ReassemblerConfig,
    in_flight: HashMap<Channel, InFlight>,
    completed: VecDeque<Packet>,
}

impl Reassembler {
    /// Create a reassembler with default configuration.
    pub fn new() -> Self {
        Self::with_config(ReassemblerConfig::default())
    }

    /// Create a reassembler with explicit configuration.
    pub fn with_config(config: ReassemblerConfig) -> Self {
        Self {
            config,
            in_flight: HashMap::new(),
            completed: VecDeque::new(),
        }
    }

    /// Feed one raw frame (a line without its newline).
    ///
    /// Rejected frames leave all state unchanged; the error says why the
    /// frame was dropped.
    pub fn feed(&mut self, frame: &[u8]) -> Result<FeedOutcome> {
        self.feed_at(frame, Instant::now())
    }

    /// [`feed`](Self::feed) with an explicit clock reading.
    pub fn feed_at(&mut self, frame: &[u8], now: Instant) -> Result<FeedOutcome> {
        let (&channel_byte, rest) = frame
            .split_first()
            .ok_or_else(|| FrameError::malformed("empty frame"))?;
        let channel = Channel::from_wire(channel_byte)?;

        let (&seq_byte, body) = rest
            .split_first()
            .ok_or_else(|| FrameError::malformed("missing fragment number"))?;
        if !seq_byte.is_ascii_digit() {
            return Err(FrameError::malformed(format!(
                "fragment number {seq_byte:#04x} is not a digit"
            )));
        }
        let seq = seq_byte - b'0';

        let (body, terminal) = match body.split_last() {
            Some((&SENTINEL, head)) => (head, true),
            _ => (body, false),
        };

        // A stale packet must not swallow the start of the next one.
        self.evict_channel_if_idle(channel, now);

        let outcome = match self.in_flight.get_mut(&channel) {
            None => {
                if seq != 0 {
                    return Err(FrameError::OrphanFragment {
                        channel,
                        fragment: seq,
                    });
                }
                self.in_flight.insert(
                    channel,
                    InFlight {
                        payload: BytesMut::from(body),
                        next_seq: 1,
                        last_update: now,
                    },
                );
                FeedOutcome::Started
            }
            Some(packet) => {
                if seq != packet.next_seq {
                    return Err(FrameError::OutOfSequence {
                        channel,
                        expected: packet.next_seq,
                        got: seq,
                    });
                }
                packet.payload.extend_from_slice(body);
                packet.next_seq = packet.next_seq.saturating_add(1).min(MAX_FRAGMENT_SEQ + 1);
                packet.last_update = now;
                FeedOutcome::Appended
            }
        };

        if terminal {
            if let Some(packet) = self.in_flight.remove(&channel) {
                trace!(%channel, size = packet.payload.len(), "packet complete");
                self.completed
                    .push_back(Packet::new(channel, packet.payload.freeze()));
            }
            return Ok(FeedOutcome::Completed);
        }

        Ok(outcome)
    }

    /// Take all completed packets in completion order.
    pub fn drain_completed(&mut self) -> Vec<Packet> {
        self.completed.drain(..).collect()
    }

    /// Discard partial packets idle for longer than the configured window.
    ///
    /// Returns the channels whose packets were dropped.
    pub fn evict_expired(&mut self) -> Vec<Channel> {
        self.evict_expired_at(Instant::now())
    }

    /// [`evict_expired`](Self::evict_expired) with an explicit clock reading.
    pub fn evict_expired_at(&mut self, now: Instant) -> Vec<Channel> {
        let idle = self.config.packet_idle;
        let expired: Vec<Channel> = self
            .in_flight
            .iter()
            .filter(|(_, packet)| now.saturating_duration_since(packet.last_update) > idle)
            .map(|(&channel, _)| channel)
            .collect();

        for channel in &expired {
            self.drop_expired(*channel);
        }
        expired
    }

    /// Partial payload currently buffered for `channel`.
    pub fn partial(&self, channel: Channel) -> Option<&[u8]> {
        self.in_flight.get(&channel).map(|p| p.payload.as_ref())
    }

    /// Number of packets in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Current configuration.
    pub fn config(&self) -> &ReassemblerConfig {
        &self.config
    }

    fn evict_channel_if_idle(&mut self, channel: Channel, now: Instant) {
        let idle = self.config.packet_idle;
        let stale = self
            .in_flight
            .get(&channel)
            .is_some_and(|p| now.saturating_duration_since(p.last_update) > idle);
        if stale {
            self.drop_expired(channel);
        }
    }

    fn drop_expired(&mut self, channel: Channel) {
        if let Some(packet) = self.in_flight.remove(&channel) {
            let err = FrameError::PacketExpired { channel };
            warn!(
                %channel,
                buffered = packet.payload.len(),
                fragments = packet.next_seq,
                "{err}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: u8) -> Channel {
        Channel::new(id).unwrap()
    }

    #[test]
    fn single_fragment_packet_completes() {
        let mut r = Reassembler::new();
        assert_eq!(r.feed(b"10tp rq\x17").unwrap(), FeedOutcome::Completed);

        let packets = r.drain_completed();
        assert_eq!(packets, vec![Packet::new(ch(1), &b"tp rq"[..])]);
        assert_eq!(r.in_flight_len(), 0);
    }

    #[test]
    fn payload_is_exact_concatenation_of_fragments() {
        let fragments: [&[u8]; 4] = [b"30tp ev,", b"31t 21.5", b"32,h 4", b"338.0\x17"];
        let mut r = Reassembler::new();
        let now = Instant::now();

        for (i, frame) in fragments.iter().enumerate() {
            let outcome = r.feed_at(frame, now).unwrap();
            match i {
                0 => assert_eq!(outcome, FeedOutcome::Started),
                3 => assert_eq!(outcome, FeedOutcome::Completed),
                _ => assert_eq!(outcome, FeedOutcome::Appended),
            }
        }

        let packets = r.drain_completed();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.as_ref(), b"tp ev,t 21.5,h 48.0");
        assert!(r.drain_completed().is_empty());
    }

    #[test]
    fn out_of_sequence_fragment_leaves_packet_unchanged() {
        let mut r = Reassembler::new();
        r.feed(b"20tp ev").unwrap();

        let err = r.feed(b"22,t 1").unwrap_err();
        assert_eq!(
            err,
            FrameError::OutOfSequence {
                channel: ch(2),
                expected: 1,
                got: 2
            }
        );
        assert_eq!(r.partial(ch(2)), Some(&b"tp ev"[..]));

        // A restart without eviction is also out of sequence.
        assert!(matches!(
            r.feed(b"20tp rq\x17"),
            Err(FrameError::OutOfSequence { got: 0, .. })
        ));
        assert_eq!(r.partial(ch(2)), Some(&b"tp ev"[..]));
    }

    #[test]
    fn orphan_fragment_is_dropped() {
        let mut r = Reassembler::new();
        let err = r.feed(b"41,t 1\x17").unwrap_err();
        assert_eq!(
            err,
            FrameError::OrphanFragment {
                channel: ch(4),
                fragment: 1
            }
        );
        assert_eq!(r.in_flight_len(), 0);
        assert!(r.drain_completed().is_empty());
    }

    #[test]
    fn non_digit_fragment_number_is_malformed() {
        let mut r = Reassembler::new();
        assert!(matches!(r.feed(b"1xtp ev"), Err(FrameError::Malformed { .. })));
        assert!(matches!(r.feed(b"1"), Err(FrameError::Malformed { .. })));
        assert!(matches!(r.feed(b""), Err(FrameError::Malformed { .. })));
        assert!(matches!(r.feed(b"x0tp ev"), Err(FrameError::InvalidChannel(b'x'))));
    }

    #[test]
    fn idle_packet_is_evicted_and_never_completes() {
        let mut r = Reassembler::new();
        let start = Instant::now();
        r.feed_at(b"50tp ev,", start).unwrap();

        assert!(r.evict_expired_at(start + Duration::from_millis(100)).is_empty());
        assert_eq!(
            r.evict_expired_at(start + Duration::from_millis(101)),
            vec![ch(5)]
        );

        // The tail now has nothing to attach to.
        let err = r
            .feed_at(b"51t 1\x17", start + Duration::from_millis(102))
            .unwrap_err();
        assert!(matches!(err, FrameError::OrphanFragment { .. }));
        assert!(r.drain_completed().is_empty());
    }

    #[test]
    fn stale_packet_is_replaced_by_new_start() {
        let mut r = Reassembler::new();
        let start = Instant::now();
        r.feed_at(b"60tp ev,", start).unwrap();

        let later = start + Duration::from_millis(150);
        assert_eq!(r.feed_at(b"60tp rq\x17", later).unwrap(), FeedOutcome::Completed);
        let packets = r.drain_completed();
        assert_eq!(packets[0].payload.as_ref(), b"tp rq");
    }

    #[test]
    fn channels_interleave_independently() {
        let mut r = Reassembler::new();
        let now = Instant::now();
        r.feed_at(b"10tp ev,", now).unwrap();
        r.feed_at(b"20tp rq\x17", now).unwrap();
        r.feed_at(b"11t 1\x17", now).unwrap();

        let packets = r.drain_completed();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0], Packet::new(ch(2), &b"tp rq"[..]));
        assert_eq!(packets[1], Packet::new(ch(1), &b"tp ev,t 1"[..]));
    }

    #[test]
    fn fragment_updates_refresh_idle_window() {
        let mut r = Reassembler::new();
        let start = Instant::now();
        r.feed_at(b"70a", start).unwrap();
        r.feed_at(b"71b", start + Duration::from_millis(80)).unwrap();

        assert!(r
            .evict_expired_at(start + Duration::from_millis(150))
            .is_empty());
        r.feed_at(b"72c\x17", start + Duration::from_millis(160))
            .unwrap();
        assert_eq!(r.drain_completed()[0].payload.as_ref(), b"abc");
    }
}
