//! Outbound command dispatch over the chunk/acknowledgement protocol.
//!
//! Each command is written in chunks the firmware can buffer. After every
//! chunk the device answers with a token:
//!
//! ```text
//! host  ──chunk──▶  device
//!       ◀─:next:──          send the next chunk
//!       ◀─:ack:───          still busy, keep waiting
//!       ◀─:success:─        done
//!       ◀─:fail:/:timeout:/:overflow:─  abort
//! ```
//!
//! Lines that are not tokens are unsolicited frames from the device; they
//! are handed to the reassembler without disturbing the wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rfbridge_frame::{split_chunks, AckToken, DEFAULT_CHUNK_SIZE};
use rfbridge_transport::{SerialLink, TransportError};
use tracing::{debug, error, info, trace, warn};

use crate::notify::{CommandErrorKind, Notification, NotificationSink};
use crate::request::OutboundItem;

/// Dispatcher timing and chunking.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Bytes per write. Default: 64.
    pub chunk_size: usize,
    /// Deadline for the acknowledgement of one chunk. Default: 500 ms.
    pub ack_timeout: Duration,
    /// How long an idle loop waits for inbound lines before checking the
    /// queue again. Default: 50 ms.
    pub idle_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout: Duration::from_millis(500),
            idle_backoff: Duration::from_millis(50),
        }
    }
}

/// How a dispatched command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failed(CommandErrorKind),
}

impl DispatchOutcome {
    /// Result notification for a command with `origin_id`.
    pub fn notification(self, origin_id: Option<String>) -> Notification {
        match self {
            Self::Success => Notification::success(origin_id),
            Self::Failed(kind) => Notification::failure(origin_id, kind),
        }
    }
}

enum ChunkAck {
    Proceed,
    Done(DispatchOutcome),
}

/// Sole writer of one serial link.
pub struct Dispatcher<L: SerialLink> {
    link: L,
    config: DispatcherConfig,
    frames: Sender<Bytes>,
}

impl<L: SerialLink> Dispatcher<L> {
    /// Wrap `link`. Unsolicited inbound lines are sent to `frames`.
    pub fn new(link: L, frames: Sender<Bytes>, config: DispatcherConfig) -> Self {
        Self {
            link,
            config,
            frames,
        }
    }

    /// Send one command and wait for its outcome.
    ///
    /// Device-reported failures are returned as [`DispatchOutcome::Failed`];
    /// only link failures are errors.
    pub fn dispatch(&mut self, item: &OutboundItem) -> Result<DispatchOutcome, TransportError> {
        let chunks: Vec<&[u8]> = split_chunks(&item.payload, self.config.chunk_size).collect();
        let total = chunks.len();
        if total == 0 {
            debug!(link = self.link.name(), "skipping empty command");
            return Ok(DispatchOutcome::Success);
        }

        for (index, chunk) in chunks.into_iter().enumerate() {
            self.link.flush_input()?;
            self.link.flush_output()?;
            self.link.write(chunk)?;
            self.link.flush()?;
            trace!(
                link = self.link.name(),
                chunk = index + 1,
                total,
                size = chunk.len(),
                "chunk written"
            );

            match self.await_ack(index + 1 == total)? {
                ChunkAck::Proceed => {}
                ChunkAck::Done(outcome) => return Ok(outcome),
            }
        }

        // The final chunk never yields Proceed.
        Ok(DispatchOutcome::Failed(CommandErrorKind::WaitingTimeout))
    }

    fn await_ack(&mut self, last: bool) -> Result<ChunkAck, TransportError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(link = self.link.name(), "no acknowledgement before deadline");
                return Ok(ChunkAck::Done(DispatchOutcome::Failed(
                    CommandErrorKind::WaitingTimeout,
                )));
            }

            let Some(line) = self.link.read_line(remaining)? else {
                continue;
            };

            match AckToken::parse(&line) {
                Some(AckToken::Next) if !last => return Ok(ChunkAck::Proceed),
                Some(token @ (AckToken::Next | AckToken::Ack)) => {
                    trace!(link = self.link.name(), token = token.as_str(), "device busy");
                }
                Some(AckToken::Success) => return Ok(ChunkAck::Done(DispatchOutcome::Success)),
                Some(token) => {
                    let kind = CommandErrorKind::from_token(token)
                        .unwrap_or(CommandErrorKind::Fail);
                    warn!(link = self.link.name(), token = token.as_str(), "device rejected command");
                    return Ok(ChunkAck::Done(DispatchOutcome::Failed(kind)));
                }
                None => self.forward(line),
            }
        }
    }

    /// Wait up to `timeout` for one inbound line and forward it.
    ///
    /// Returns whether a line was read.
    pub fn poll_inbound(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        match self.link.read_line(timeout)? {
            Some(line) => {
                match AckToken::parse(&line) {
                    Some(token) => {
                        debug!(link = self.link.name(), token = token.as_str(), "ignoring stray token");
                    }
                    None => self.forward(line),
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn forward(&self, line: Bytes) {
        if line.is_empty() {
            return;
        }
        if self.frames.send(line).is_err() {
            trace!(link = self.link.name(), "reassembler gone, dropping frame");
        }
    }

    /// Drain `outbound` until `stop` disconnects or the link fails.
    ///
    /// Between commands the loop listens for inbound lines for at most
    /// `idle_backoff`, which bounds how long a stop request waits when idle.
    /// When the link fails, the command in flight and every command still
    /// queued are reported as [`CommandErrorKind::LinkFailed`].
    pub fn run(
        mut self,
        outbound: &Receiver<OutboundItem>,
        stop: &Receiver<()>,
        sink: &Arc<dyn NotificationSink>,
    ) -> DispatcherExit<L> {
        info!(link = self.link.name(), "dispatcher started");
        let mut failure = None;
        loop {
            if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
                break;
            }

            let step = match outbound.try_recv() {
                Ok(item) => match self.dispatch(&item) {
                    Ok(outcome) => {
                        report(&item, outcome, sink);
                        Ok(())
                    }
                    Err(err) => {
                        report(&item, LINK_FAILED, sink);
                        Err(err)
                    }
                },
                Err(TryRecvError::Empty) => self.poll_inbound(self.config.idle_backoff).map(drop),
                Err(TryRecvError::Disconnected) => break,
            };

            if let Err(err) = step {
                error!(link = self.link.name(), error = %err, "link failed, stopping session");
                fail_pending(outbound.try_iter(), sink);
                failure = Some(err);
                break;
            }
        }
        info!(link = self.link.name(), "dispatcher stopped");
        DispatcherExit {
            link: self.link,
            failure,
        }
    }

    /// Release the link.
    pub fn into_link(self) -> L {
        self.link
    }
}

/// What [`Dispatcher::run`] hands back when its loop ends.
pub struct DispatcherExit<L> {
    /// The link, for the owner to close.
    pub link: L,
    /// The link error that ended the loop, if it did not end on request.
    pub failure: Option<TransportError>,
}

const LINK_FAILED: DispatchOutcome = DispatchOutcome::Failed(CommandErrorKind::LinkFailed);

/// Report commands that will never be sent because the link is gone.
pub(crate) fn fail_pending(
    items: impl IntoIterator<Item = OutboundItem>,
    sink: &Arc<dyn NotificationSink>,
) {
    for item in items {
        report(&item, LINK_FAILED, sink);
    }
}

fn report(item: &OutboundItem, outcome: DispatchOutcome, sink: &Arc<dyn NotificationSink>) {
    let channel = item.channel.map(|c| c.to_string()).unwrap_or_default();
    match &item.origin_id {
        Some(origin) => {
            debug!(%channel, origin = %origin, ?outcome, "command finished");
            sink.notify(outcome.notification(Some(origin.clone())));
        }
        None => debug!(%channel, ?outcome, "untracked command finished"),
    }
}
