use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rfbridge_frame::Channel;
use rfbridge_session::{CommandRequest, DeviceSession, NotificationSink, SessionHandle};
use rfbridge_transport::SerialLink;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cmd::RunArgs;
use crate::exit::{io_error, session_error, CliError, CliResult, INTERNAL, SUCCESS, TRANSPORT_ERROR};
use crate::output::{OutputFormat, StdoutSink};

const SUPERVISE_TICK: Duration = Duration::from_millis(50);

/// One line of stdin input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputLine {
    LearnIr(LearnIrRequest),
    Command(CommandRequest),
}

#[derive(Debug, Deserialize)]
struct LearnIrRequest {
    channel: Channel,
    pulses: String,
    #[serde(default)]
    origin_id: Option<String>,
}

/// Run a session over `link` until Ctrl-C, `--duration` or link failure.
///
/// Requests are read from stdin as JSON lines; notifications go to stdout.
pub fn run_session<L: SerialLink + 'static>(
    link: L,
    args: &RunArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let config = args.session_config()?;
    let deadline = args.duration()?.map(|d| Instant::now() + d);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let sink: Arc<dyn NotificationSink> = Arc::new(StdoutSink::new(format));
    let mut session = DeviceSession::start(link, sink, config)
        .map_err(|err| session_error("session start failed", err))?;
    spawn_stdin_reader(session.handle())?;

    while running.load(Ordering::SeqCst) && session.is_running() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        thread::sleep(SUPERVISE_TICK);
    }

    let link_failed = !session.is_running();
    session
        .close()
        .map_err(|err| session_error("session close failed", err))?;

    if link_failed {
        return Err(CliError::new(
            TRANSPORT_ERROR,
            format!("device link {} failed", session.name()),
        ));
    }
    info!(link = session.name(), "session finished");
    Ok(SUCCESS)
}

fn spawn_stdin_reader(handle: SessionHandle) -> CliResult<()> {
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || read_requests(std::io::stdin().lock(), &handle))
        .map(drop)
        .map_err(|err| io_error("stdin reader", err))
}

/// Submit every request line from `input` until EOF or the session closes.
fn read_requests(input: impl BufRead, handle: &SessionHandle) {
    let mut next_origin = 1u64;
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<InputLine>(line) {
            Ok(InputLine::LearnIr(req)) => handle.learn_ir(req.channel, &req.pulses, req.origin_id),
            Ok(InputLine::Command(mut req)) => {
                if req.origin_id.is_none() {
                    req.origin_id = Some(format!("stdin-{next_origin}"));
                    next_origin += 1;
                }
                if let Err(err) = handle.submit(&req) {
                    warn!(error = %err, "cannot submit request");
                    break;
                }
            }
            Err(err) => warn!(error = %err, "ignoring invalid request line"),
        }
    }
    debug!("stdin closed");
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
