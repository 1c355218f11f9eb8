use std::time::Duration;

use adtlink_port::DEFAULT_ALIGNMENT;

use crate::cmd::SimulateArgs;
use crate::exit::{CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_report, OutputFormat};
use crate::sim::{self, SimulationPlan};

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    if args.payload_size < DEFAULT_ALIGNMENT || args.payload_size % DEFAULT_ALIGNMENT != 0 {
        return Err(CliError::new(
            USAGE,
            format!(
                "payload size must be a non-zero multiple of {DEFAULT_ALIGNMENT}, got {}",
                args.payload_size
            ),
        ));
    }
    let plan = SimulationPlan {
        clients: usize::from(args.clients),
        messages: args.messages,
        payload_size: args.payload_size,
        max_latency: parse_duration(&args.max_latency, true)?,
        restart: args.restart,
        timeout: parse_duration(&args.timeout, false)?,
        config: crate::config::load(
            args.config.as_deref(),
            args.rx_buffer_size,
            args.tx_buffer_size,
        )?,
    };

    let report = sim::run(&plan)?;
    print_report(&report, format);

    if args.strict && !report.completed {
        return Err(CliError::new(
            FAILURE,
            format!(
                "simulation incomplete: delivered {}/{} messages, {}/{} replies",
                report.delivered, report.sent, report.replies_received, report.replies_sent
            ),
        ));
    }
    Ok(SUCCESS)
}

fn parse_duration(input: &str, allow_zero: bool) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 && !allow_zero {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s", false).unwrap(), Duration::from_secs(2));
        assert_eq!(
            parse_duration("150ms", false).unwrap(),
            Duration::from_millis(150)
        );
        assert_eq!(parse_duration("3", false).unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn zero_latency_is_allowed_zero_timeout_is_not() {
        assert_eq!(parse_duration("0ms", true).unwrap(), Duration::ZERO);
        assert!(parse_duration("0s", false).is_err());
        assert!(parse_duration("bad", true).is_err());
    }
}
