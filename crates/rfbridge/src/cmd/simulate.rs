use rfbridge_transport::{SimConfig, SimulatedDevice};

use crate::cmd::{parse_duration, serve, SimulateArgs};
use crate::exit::{transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let config = sim_config(&args)?;
    let device =
        SimulatedDevice::open(config).map_err(|err| transport_error("simulator failed", err))?;
    serve::run_session(device, &args.run, format)
}

fn sim_config(args: &SimulateArgs) -> CliResult<SimConfig> {
    if let Some(bad) = args.channels.iter().find(|&&c| c > rfbridge_frame::MAX_CHANNEL) {
        return Err(CliError::new(USAGE, format!("invalid channel {bad}")));
    }
    if args.channels.is_empty() {
        return Err(CliError::new(USAGE, "at least one channel is required"));
    }

    let mut config = if args.quiet {
        SimConfig::quiet()
    } else {
        SimConfig {
            event_period: parse_duration(&args.event_period)?,
            poll_period: parse_duration(&args.poll_period)?,
            ..SimConfig::default()
        }
    };
    config.name = args.name.clone();
    config.channels = args.channels.clone();
    config.seed = args.seed;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cmd::RunArgs;

    fn args(channels: Vec<u8>, quiet: bool) -> SimulateArgs {
        SimulateArgs {
            name: "bench".into(),
            event_period: "250ms".into(),
            poll_period: "1s".into(),
            channels,
            seed: Some(9),
            quiet,
            run: RunArgs {
                duration: None,
                ack_timeout: "500ms".into(),
                chunk_size: 64,
            },
        }
    }

    #[test]
    fn builds_generator_config() {
        let config = sim_config(&args(vec![4, 5], false)).unwrap();
        assert_eq!(config.name, "bench");
        assert_eq!(config.event_period, Duration::from_millis(250));
        assert_eq!(config.poll_period, Duration::from_secs(1));
        assert_eq!(config.channels, vec![4, 5]);
        assert_eq!(config.seed, Some(9));
    }

    #[test]
    fn quiet_disables_generator() {
        let config = sim_config(&args(vec![1], true)).unwrap();
        assert!(config.event_period.is_zero());
        assert!(config.poll_period.is_zero());
    }

    #[test]
    fn rejects_out_of_range_channels() {
        assert_eq!(sim_config(&args(vec![1, 10], false)).unwrap_err().code, USAGE);
        assert_eq!(sim_config(&args(vec![], false)).unwrap_err().code, USAGE);
    }
}
