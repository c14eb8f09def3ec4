use std::io::Read;

use rfbridge_frame::{compress_signal, Channel};

use crate::cmd::CompressIrArgs;
use crate::exit::{frame_error, io_error, ir_error, CliResult, SUCCESS};
use crate::output::{print_ir, OutputFormat};

pub fn run(args: CompressIrArgs, format: OutputFormat) -> CliResult<i32> {
    let channel = Channel::new(args.channel).map_err(|err| frame_error("invalid channel", err))?;
    let capture = match args.pulses {
        Some(pulses) => pulses,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|err| io_error("failed to read stdin", err))?;
            text
        }
    };

    let signal =
        compress_signal(channel, &capture).map_err(|err| ir_error("cannot compress signal", err))?;
    print_ir(channel, &signal, format);
    Ok(SUCCESS)
}
