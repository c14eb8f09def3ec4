use rfbridge_frame::{DEFAULT_CHUNK_SIZE, SENTINEL};
use rfbridge_transport::DEFAULT_BAUD_RATE;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("rfbridge {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: rfbridge");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("RFBRIDGE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("RFBRIDGE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: session={}, cli=true",
        cfg!(feature = "session")
    );
    println!("baud_rate: {DEFAULT_BAUD_RATE}");
    println!("chunk_size: {DEFAULT_CHUNK_SIZE}");
    println!("sentinel: {SENTINEL:#04x}");

    Ok(SUCCESS)
}
