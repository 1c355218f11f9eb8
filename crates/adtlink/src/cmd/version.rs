use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("adtlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: adtlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("ADTLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("ADTLINK_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!(
        "max_ring_capacity: {}",
        adtlink_frame::MAX_CAPACITY
    );
    println!("max_clients: {}", adtlink_frame::MAX_RECIPIENTS);
    println!(
        "features: mux={}, cli=true",
        cfg!(feature = "mux")
    );

    Ok(SUCCESS)
}
