use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::DEFAULT_ENCODER_UNITS_PER_TURN;
use super::error::ConfigError;

/// Structure representing the application configuration: where the
/// image file and log files live, which channel to address, and the
/// optional frame-tail output. Configs are serializable and
/// deserializable to YAML using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tiff_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub rotary_path: Option<PathBuf>,
    pub channel: u32,
    pub encoder_units_per_turn: u32,
    pub tail_frames: Option<usize>,
    pub tail_path: Option<PathBuf>,
}

impl Default for Config {
    /// Generate a new Config object. Path fields will be empty/invalid
    fn default() -> Self {
        Self {
            tiff_path: PathBuf::from("None"),
            log_path: None,
            rotary_path: None,
            channel: 1,
            encoder_units_per_turn: DEFAULT_ENCODER_UNITS_PER_TURN,
            tail_frames: None,
            tail_path: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn does_tiff_exist(&self) -> bool {
        self.tiff_path.exists()
    }

    pub fn has_position_log(&self) -> bool {
        self.log_path.is_some()
    }

    pub fn has_rotary_log(&self) -> bool {
        self.rotary_path.is_some()
    }

    pub fn wants_tail(&self) -> bool {
        self.tail_frames.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.tiff_path = PathBuf::from("/data/run_0001.tif");
        config.log_path = Some(PathBuf::from("/data/run_0001_log.txt"));
        config.tail_frames = Some(500);

        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.tiff_path, config.tiff_path);
        assert_eq!(back.log_path, config.log_path);
        assert_eq!(back.channel, 1);
        assert_eq!(back.encoder_units_per_turn, DEFAULT_ENCODER_UNITS_PER_TURN);
        assert_eq!(back.tail_frames, Some(500));
        assert!(back.has_position_log());
        assert!(!back.has_rotary_log());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            Config::read_config_file(Path::new("/no/such/config.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }
}
