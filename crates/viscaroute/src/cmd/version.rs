use viscaroute_frame::{BUFFER_CAPACITY, MAX_FRAME_LEN};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("viscaroute {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: viscaroute");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("VISCAROUTE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("VISCAROUTE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("max_frame_len: {MAX_FRAME_LEN}");
    println!("reassembly_capacity: {BUFFER_CAPACITY}");
    println!("features: router={}, cli=true", cfg!(feature = "router"));

    Ok(SUCCESS)
}
