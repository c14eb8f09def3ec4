use rfbridge_transport::{SerialConfig, SerialPortLink};

use crate::cmd::{parse_duration, serve, AttachArgs};
use crate::exit::{transport_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: AttachArgs, format: OutputFormat) -> CliResult<i32> {
    let config = SerialConfig {
        port: args.port.clone(),
        baud_rate: args.baud,
        settle_delay: parse_duration(&args.settle)?,
        ..SerialConfig::default()
    };
    let link = SerialPortLink::open(&config).map_err(|err| transport_error("attach failed", err))?;
    serve::run_session(link, &args.run, format)
}
