//! Commands held until the device on their channel polls for them.

use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rfbridge_frame::Channel;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::request::OutboundItem;

/// One buffered command.
#[derive(Debug, Clone)]
pub struct RequestEntry {
    pub channel: Channel,
    pub item: OutboundItem,
    /// Position within the channel, increasing with each `add`.
    pub order: u64,
    pub expires_at: Instant,
}

impl RequestEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Per-channel FIFO of poll-driven commands with lazy expiry.
///
/// Shared between the thread accepting new commands and the session's
/// reassembler loop answering polls; every operation takes the one lock.
#[derive(Debug, Default)]
pub struct RequestBuffer {
    entries: Mutex<Vec<RequestEntry>>,
}

impl RequestBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `item` for `channel` for at most `expire_after`.
    ///
    /// Returns the order assigned to the entry.
    pub fn add(&self, channel: Channel, item: OutboundItem, expire_after: Duration) -> u64 {
        self.add_at(channel, item, expire_after, Instant::now())
    }

    /// [`add`](Self::add) with an explicit clock reading.
    pub fn add_at(
        &self,
        channel: Channel,
        item: OutboundItem,
        expire_after: Duration,
        now: Instant,
    ) -> u64 {
        let mut entries = self.entries.lock();
        let order = entries
            .iter()
            .filter(|e| e.channel == channel)
            .map(|e| e.order)
            .max()
            .unwrap_or(0)
            + 1;
        entries.push(RequestEntry {
            channel,
            item,
            order,
            expires_at: now + expire_after,
        });
        debug!(%channel, order, "buffered command until next poll");
        order
    }

    /// Remove and return the oldest live command for `channel`.
    ///
    /// Expired entries of every channel are discarded on the way.
    pub fn take_for(&self, channel: Channel) -> Option<OutboundItem> {
        self.take_for_at(channel, Instant::now())
    }

    /// [`take_for`](Self::take_for) with an explicit clock reading.
    pub fn take_for_at(&self, channel: Channel, now: Instant) -> Option<OutboundItem> {
        let mut entries = self.entries.lock();
        entries.retain(|e| {
            let expired = e.is_expired(now);
            if expired {
                debug!(channel = %e.channel, order = e.order, "buffered command expired");
            }
            !expired
        });

        let index = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.channel == channel)
            .min_by_key(|(_, e)| e.order)
            .map(|(i, _)| i)?;
        Some(entries.remove(index).item)
    }

    /// Answer a poll from `channel`.
    ///
    /// Enqueues the oldest buffered command for the channel, or an empty
    /// command when there is none, so the polling device always gets a reply.
    /// Returns whether a buffered command was found.
    pub fn check_request(&self, channel: Channel, outbound: &Sender<OutboundItem>) -> Result<bool> {
        self.check_request_at(channel, outbound, Instant::now())
    }

    /// [`check_request`](Self::check_request) with an explicit clock reading.
    pub fn check_request_at(
        &self,
        channel: Channel,
        outbound: &Sender<OutboundItem>,
        now: Instant,
    ) -> Result<bool> {
        let (item, found) = match self.take_for_at(channel, now) {
            Some(item) => (item, true),
            None => {
                debug!(%channel, "nothing buffered, answering poll with empty command");
                (OutboundItem::empty(channel), false)
            }
        };
        outbound.send(item).map_err(|_| SessionError::Closed)?;
        Ok(found)
    }

    /// Remove every live command, oldest first within each channel.
    ///
    /// Used when the link is gone and nothing buffered can be delivered.
    pub fn drain(&self) -> Vec<OutboundItem> {
        self.drain_at(Instant::now())
    }

    /// [`drain`](Self::drain) with an explicit clock reading.
    pub fn drain_at(&self, now: Instant) -> Vec<OutboundItem> {
        let mut live: Vec<RequestEntry> = std::mem::take(&mut *self.entries.lock())
            .into_iter()
            .filter(|e| !e.is_expired(now))
            .collect();
        live.sort_by_key(|e| (e.channel, e.order));
        live.into_iter().map(|e| e.item).collect()
    }

    /// Entries currently stored, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(id: u8) -> Channel {
        Channel::new(id).unwrap()
    }

    fn item(tag: &str) -> OutboundItem {
        OutboundItem::new(format!("{tag}\n"), Some(tag.to_string()))
    }

    fn origin(item: Option<OutboundItem>) -> Option<String> {
        item.and_then(|i| i.origin_id)
    }

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn orders_increase_per_channel() {
        let buf = RequestBuffer::new();
        let now = Instant::now();
        assert_eq!(buf.add_at(ch(1), item("a"), TTL, now), 1);
        assert_eq!(buf.add_at(ch(1), item("b"), TTL, now), 2);
        assert_eq!(buf.add_at(ch(2), item("c"), TTL, now), 1);
        assert_eq!(buf.add_at(ch(1), item("d"), TTL, now), 3);

        // Taking the head must not let a later add reuse a live order.
        buf.take_for_at(ch(1), now);
        assert_eq!(buf.add_at(ch(1), item("e"), TTL, now), 4);
    }

    #[test]
    fn take_for_is_fifo_per_channel() {
        let buf = RequestBuffer::new();
        let now = Instant::now();
        buf.add_at(ch(1), item("a"), TTL, now);
        buf.add_at(ch(2), item("x"), TTL, now);
        buf.add_at(ch(1), item("b"), TTL, now);

        assert_eq!(origin(buf.take_for_at(ch(1), now)), Some("a".into()));
        assert_eq!(origin(buf.take_for_at(ch(1), now)), Some("b".into()));
        assert_eq!(origin(buf.take_for_at(ch(1), now)), None);
        assert_eq!(origin(buf.take_for_at(ch(2), now)), Some("x".into()));
        assert!(buf.is_empty());
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let buf = RequestBuffer::new();
        let now = Instant::now();
        buf.add_at(ch(1), item("short"), Duration::from_millis(50), now);
        buf.add_at(ch(1), item("long"), TTL, now);
        buf.add_at(ch(3), item("other"), Duration::from_millis(50), now);

        let later = now + Duration::from_millis(51);
        assert_eq!(origin(buf.take_for_at(ch(1), later)), Some("long".into()));
        // The scan also swept the other channel's stale entry.
        assert!(buf.is_empty());
    }

    #[test]
    fn entry_is_live_until_its_expiry_passes() {
        let buf = RequestBuffer::new();
        let now = Instant::now();
        buf.add_at(ch(1), item("a"), Duration::from_millis(50), now);
        assert!(buf
            .take_for_at(ch(1), now + Duration::from_millis(50))
            .is_some());
    }

    #[test]
    fn check_request_forwards_buffered_command() {
        let buf = RequestBuffer::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        buf.add(ch(2), item("on"), TTL);

        assert!(buf.check_request(ch(2), &tx).unwrap());
        assert_eq!(rx.try_recv().unwrap().origin_id.as_deref(), Some("on"));
    }

    #[test]
    fn check_request_synthesizes_empty_command() {
        let buf = RequestBuffer::new();
        let (tx, rx) = crossbeam_channel::unbounded();

        assert!(!buf.check_request(ch(7), &tx).unwrap());
        let sent = rx.try_recv().unwrap();
        assert_eq!(sent.payload.as_ref(), b"7e\n");
        assert_eq!(sent.origin_id, None);
    }

    #[test]
    fn drain_empties_buffer_and_skips_expired() {
        let buf = RequestBuffer::new();
        let now = Instant::now();
        buf.add_at(ch(2), item("x"), TTL, now);
        buf.add_at(ch(1), item("a"), TTL, now);
        buf.add_at(ch(1), item("stale"), Duration::from_millis(10), now);
        buf.add_at(ch(1), item("b"), TTL, now);

        let drained: Vec<_> = buf
            .drain_at(now + Duration::from_millis(20))
            .into_iter()
            .filter_map(|i| i.origin_id)
            .collect();
        assert_eq!(drained, ["a", "b", "x"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn check_request_fails_once_dispatcher_is_gone() {
        let buf = RequestBuffer::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        assert!(matches!(
            buf.check_request(ch(1), &tx),
            Err(SessionError::Closed)
        ));
    }
}
