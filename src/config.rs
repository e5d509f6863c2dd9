use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

use crate::error::Result;

lazy_static! {
    static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}

/// Demand requested per consumer wakeup when nothing else is configured.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Number of units a demuxed stream or filter sink asks for each time it runs dry.
    pub high_water_mark: usize,
    /// Upper bound on packets buffered per demuxed stream, `None` for unbounded.
    pub max_buffered_packets: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            max_buffered_packets: None,
        }
    }
}

impl Config {
    fn load() -> Self {
        let mut config = Config::default();

        // Environment first, then the config file overrides
        if let Ok(value) = env::var("AVPIPE_HIGH_WATER_MARK") {
            match value.trim().parse::<usize>() {
                Ok(v) if v > 0 => config.high_water_mark = v,
                _ => log::warn!("ignoring invalid AVPIPE_HIGH_WATER_MARK={:?}", value),
            }
        }
        if let Ok(value) = env::var("AVPIPE_MAX_BUFFERED_PACKETS") {
            match value.trim().parse::<usize>() {
                Ok(v) => config.max_buffered_packets = Some(v),
                Err(_) => log::warn!("ignoring invalid AVPIPE_MAX_BUFFERED_PACKETS={:?}", value),
            }
        }

        let config_paths = ["./avpipe.toml", "./avpipe_config.toml"];
        for path in &config_paths {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    match config.apply(&content) {
                        Ok(()) => log::info!("loaded configuration from {}", path),
                        Err(e) => log::warn!("ignoring {}: {}", path, e),
                    }
                }
            }
        }

        config
    }

    /// Parses `key = value` lines on top of the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Config::default();
        config.apply(content)?;
        Ok(config)
    }

    fn apply(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key.trim() {
                "high_water_mark" => {
                    let v = value.parse::<usize>()?;
                    if v > 0 {
                        self.high_water_mark = v;
                    }
                }
                "max_buffered_packets" => {
                    self.max_buffered_packets = if value.is_empty() || value == "none" {
                        None
                    } else {
                        Some(value.parse::<usize>()?)
                    };
                }
                other => log::debug!("unknown configuration key {:?}", other),
            }
        }
        Ok(())
    }

    pub fn reload() {
        let new_config = Config::load();
        if let Ok(mut config) = CONFIG.write() {
            *config = new_config;
        }
    }
}

/// Returns a snapshot of the process-wide configuration
pub fn get() -> Config {
    match CONFIG.read() {
        Ok(config) => config.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# avpipe configuration

# Units requested by a demuxed stream or filter sink each time it runs dry
high_water_mark = 16

# Per-stream packet bound for the demuxer, "none" for unbounded
max_buffered_packets = none
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}
