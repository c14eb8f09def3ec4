//! One attached microcontroller and the worker loops serving it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{select, Receiver, Sender};
use rfbridge_frame::{Channel, PacketKind, Reassembler, ReassemblerConfig};
use rfbridge_transport::SerialLink;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{fail_pending, Dispatcher, DispatcherConfig};
use crate::error::{Result, SessionError};
use crate::notify::{learn_ir, Notification, NotificationSink};
use crate::request::{CommandRequest, OutboundItem};
use crate::request_buffer::RequestBuffer;

/// Session behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub dispatcher: DispatcherConfig,
    pub reassembler: ReassemblerConfig,
    /// Cadence of packet completion and expiry checks. Default: 10 ms.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            reassembler: ReassemblerConfig::default(),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Cloneable entry point for submitting work to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: Sender<OutboundItem>,
    requests: Arc<RequestBuffer>,
    sink: Arc<dyn NotificationSink>,
    running: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Queue a command.
    ///
    /// Immediate commands go straight to the dispatcher; deferred ones wait
    /// in the request buffer for the device's next poll.
    pub fn submit(&self, request: &CommandRequest) -> Result<()> {
        if !self.is_running() {
            return Err(SessionError::Closed);
        }
        let item = request.to_outbound();
        match request.expire_after() {
            Some(ttl) => {
                self.requests.add(request.channel, item, ttl);
                Ok(())
            }
            None => self.outbound.send(item).map_err(|_| SessionError::Closed),
        }
    }

    /// Compress a learned IR capture and report it through the sink.
    pub fn learn_ir(&self, channel: Channel, capture: &str, origin_id: Option<String>) {
        self.sink.notify(learn_ir(channel, capture, origin_id));
    }

    /// Whether both worker loops are still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Commands waiting for a poll, expired ones included until the next scan.
    pub fn buffered(&self) -> usize {
        self.requests.len()
    }
}

/// Clears the running flag when a worker loop ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A microcontroller attached over one serial link.
///
/// Runs a dispatcher thread (sole owner of the link) and a reassembler
/// thread. Dropping or closing the session stops both loops and then closes
/// the link. A stop takes effect within one loop iteration: one idle
/// backoff, or the rest of an in-flight command's acknowledgement wait.
pub struct DeviceSession<L: SerialLink + 'static> {
    name: String,
    handle: SessionHandle,
    stop: Option<Sender<()>>,
    dispatcher: Option<JoinHandle<L>>,
    reassembler: Option<JoinHandle<()>>,
}

impl<L: SerialLink + 'static> DeviceSession<L> {
    /// Start the worker loops over `link`.
    pub fn start(link: L, sink: Arc<dyn NotificationSink>, config: SessionConfig) -> Result<Self> {
        let name = link.name().to_string();
        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded::<OutboundItem>();
        let (frames_tx, frames_rx) = crossbeam_channel::unbounded::<Bytes>();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let running = Arc::new(AtomicBool::new(true));
        let requests = Arc::new(RequestBuffer::new());

        let handle = SessionHandle {
            outbound: outbound_tx.clone(),
            requests: Arc::clone(&requests),
            sink: Arc::clone(&sink),
            running: Arc::clone(&running),
        };

        let reassembler = {
            let worker = ReassemblerLoop {
                reassembler: Reassembler::with_config(config.reassembler.clone()),
                requests: Arc::clone(&requests),
                outbound: outbound_tx,
                sink: Arc::clone(&sink),
                poll_interval: config.poll_interval,
            };
            let stop = stop_rx.clone();
            let guard = RunningGuard(Arc::clone(&running));
            thread::Builder::new()
                .name(format!("{name}-reassembler"))
                .spawn(move || {
                    let _guard = guard;
                    worker.run(&frames_rx, &stop);
                })
                .map_err(SessionError::Spawn)?
        };

        let dispatcher = {
            let worker = Dispatcher::new(link, frames_tx, config.dispatcher.clone());
            let running = Arc::clone(&running);
            let spawned = thread::Builder::new()
                .name(format!("{name}-dispatcher"))
                .spawn(move || {
                    let _guard = RunningGuard(Arc::clone(&running));
                    let exit = worker.run(&outbound_rx, &stop_rx, &sink);
                    if exit.failure.is_some() {
                        // Refuse new work first, then fail whatever is left.
                        running.store(false, Ordering::Release);
                        fail_pending(outbound_rx.try_iter(), &sink);
                        fail_pending(requests.drain(), &sink);
                    }
                    exit.link
                });
            match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    drop(stop_tx);
                    let _ = reassembler.join();
                    return Err(SessionError::Spawn(err));
                }
            }
        };

        info!(link = %name, "device session started");
        Ok(Self {
            name,
            handle,
            stop: Some(stop_tx),
            dispatcher: Some(dispatcher),
            reassembler: Some(reassembler),
        })
    }

    /// Handle for submitting commands from other threads.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Shorthand for `handle().submit(request)`.
    pub fn submit(&self, request: &CommandRequest) -> Result<()> {
        self.handle.submit(request)
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether both worker loops are still alive.
    ///
    /// Turns false on its own when the link fails.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Stop the worker loops, then close the link.
    pub fn close(&mut self) -> Result<()> {
        let Some(stop) = self.stop.take() else {
            return Ok(());
        };
        self.handle.running.store(false, Ordering::Release);
        drop(stop);

        if let Some(reassembler) = self.reassembler.take() {
            if reassembler.join().is_err() {
                error!(link = %self.name, "reassembler thread panicked");
            }
        }

        let link = self.dispatcher.take().map(JoinHandle::join);
        match link {
            Some(Ok(mut link)) => {
                link.close()?;
                info!(link = %self.name, "device session closed");
            }
            Some(Err(_)) => error!(link = %self.name, "dispatcher thread panicked"),
            None => {}
        }
        Ok(())
    }
}

impl<L: SerialLink + 'static> Drop for DeviceSession<L> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(link = %self.name, error = %err, "error while closing session");
        }
    }
}

/// Drives the reassembler and routes completed packets.
struct ReassemblerLoop {
    reassembler: Reassembler,
    requests: Arc<RequestBuffer>,
    outbound: Sender<OutboundItem>,
    sink: Arc<dyn NotificationSink>,
    poll_interval: Duration,
}

impl ReassemblerLoop {
    fn run(mut self, frames: &Receiver<Bytes>, stop: &Receiver<()>) {
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(frames) -> frame => match frame {
                    Ok(frame) => self.feed(&frame),
                    Err(_) => {
                        debug!("frame source closed");
                        break;
                    }
                },
                default(self.poll_interval) => {}
            }

            self.reassembler.evict_expired();
            if !self.route_completed() {
                break;
            }
        }
        debug!("reassembler loop stopped");
    }

    fn feed(&mut self, frame: &[u8]) {
        if let Err(err) = self.reassembler.feed(frame) {
            warn!(error = %err, frame = %String::from_utf8_lossy(frame), "dropping frame");
        }
    }

    /// Returns false once the dispatcher is gone.
    fn route_completed(&mut self) -> bool {
        for packet in self.reassembler.drain_completed() {
            let parsed = match packet.parse() {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(channel = %packet.channel, error = %err, "dropping packet");
                    continue;
                }
            };

            match parsed.kind {
                PacketKind::Event => self.sink.notify(Notification::Event {
                    channel: parsed.channel,
                    fields: parsed.fields,
                }),
                PacketKind::Request => {
                    if let Err(err) = self.requests.check_request(parsed.channel, &self.outbound) {
                        debug!(channel = %parsed.channel, error = %err, "cannot answer poll");
                        return false;
                    }
                }
                PacketKind::Response => {
                    debug!(channel = %parsed.channel, fields = ?parsed.fields, "device response");
                }
            }
        }
        true
    }
}
