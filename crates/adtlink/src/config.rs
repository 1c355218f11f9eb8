use std::path::Path;

use adtlink_mux::MuxConfig;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};

/// Load a config file and apply command-line overrides on top.
pub fn load(
    path: Option<&Path>,
    rx_buffer_size: Option<usize>,
    tx_buffer_size: Option<usize>,
) -> CliResult<MuxConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
            serde_json::from_str::<MuxConfig>(&text).map_err(|err| {
                CliError::new(
                    DATA_INVALID,
                    format!("parse config {}: {err}", path.display()),
                )
            })?
        }
        None => MuxConfig::default(),
    };

    if let Some(size) = rx_buffer_size {
        config.pump.rx_buffer_size = size;
    }
    if let Some(size) = tx_buffer_size {
        config.pump.tx_buffer_size = size;
    }
    config
        .validate()
        .map_err(|err| CliError::new(USAGE, format!("invalid config: {err}")))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let config = load(None, Some(1023), None).unwrap();
        assert_eq!(config.pump.rx_buffer_size, 1023);
        assert_eq!(config.pump.tx_buffer_size, MuxConfig::default().pump.tx_buffer_size);
    }

    #[test]
    fn out_of_range_override_is_usage_error() {
        let err = load(None, None, Some(0)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load(Some(Path::new("/nonexistent/adtlink.json")), None, None).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
