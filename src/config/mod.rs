mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./streamhold.toml",
        "~/.config/streamhold/config.toml",
        "/etc/streamhold/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let timeshift = &config.timeshift;
    if timeshift.chunk_size_mb == 0 {
        anyhow::bail!("Timeshift chunk size cannot be 0");
    }
    if timeshift.unit_size_kb == 0 {
        anyhow::bail!("Timeshift unit size cannot be 0");
    }
    let chunk_bytes = timeshift.chunk_size_mb * 1024 * 1024;
    let unit_bytes = timeshift.unit_size_kb as u64 * 1024;
    if unit_bytes > chunk_bytes {
        anyhow::bail!(
            "Timeshift unit ({} KiB) is larger than a chunk ({} MiB)",
            timeshift.unit_size_kb,
            timeshift.chunk_size_mb
        );
    }
    // Units that straddle a chunk boundary get truncated once the window is full.
    if chunk_bytes % unit_bytes != 0 {
        anyhow::bail!(
            "Timeshift chunk size ({} MiB) must be a multiple of the unit size ({} KiB)",
            timeshift.chunk_size_mb,
            timeshift.unit_size_kb
        );
    }
    if timeshift.size_factor < 3 {
        tracing::warn!(
            "Timeshift size factor {} is below the minimum, 3 chunks will be kept",
            timeshift.size_factor
        );
    }

    if config.hls.segments_to_cache == 0 {
        anyhow::bail!("HLS segments_to_cache cannot be 0");
    }
    if config.hls.segment_size_mb == 0 {
        anyhow::bail!("HLS segment size cannot be 0");
    }

    if config.transport.timeout_secs == 0 {
        anyhow::bail!("Transport timeout cannot be 0");
    }

    Ok(())
}
