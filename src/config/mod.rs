use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::table::DEFAULT_CAPACITY;

pub const DEFAULT_DATA_FILE: &str = "kvstore_data.bin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Slots allocated for a fresh or cleared table. Zero means the table
    /// default.
    pub initial_capacity: usize,
    /// File used by `save` and `load` when no name is given, and for
    /// autoload/autosave in the shell.
    pub data_file: String,
    /// Longest value the shell accepts in a `set` command.
    pub max_value_len: usize,
    /// Save to `data_file` when the shell exits with a non-empty store.
    pub autosave: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            initial_capacity: DEFAULT_CAPACITY,
            data_file: DEFAULT_DATA_FILE.to_owned(),
            max_value_len: 512,
            autosave: true,
        }
    }
}

impl StoreConfig {
    /// Reads a JSON config. Fields that are missing take their defaults.
    pub fn load<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(contents.as_str())?)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::{StoreConfig, DEFAULT_DATA_FILE};

    #[test]
    fn test_partial_config() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(br#"{"initial_capacity": 4, "autosave": false}"#)?;

        let config = StoreConfig::load(file.path())?;
        assert_eq!(config.initial_capacity, 4);
        assert!(!config.autosave);
        assert_eq!(config.data_file, DEFAULT_DATA_FILE);
        assert_eq!(config.max_value_len, 512);
        Ok(())
    }

    #[test]
    fn test_bad_config() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"{not json")?;
        assert!(StoreConfig::load(file.path()).is_err());
        assert!(StoreConfig::load("/nonexistent/kvs.json").is_err());
        Ok(())
    }

    #[test]
    fn test_json_round_trip() -> anyhow::Result<()> {
        let config = StoreConfig {
            initial_capacity: 64,
            data_file: "other.bin".into(),
            max_value_len: 10,
            autosave: false,
        };
        let encoded = serde_json::to_string(&config)?;
        assert_eq!(serde_json::from_str::<StoreConfig>(&encoded)?, config);
        Ok(())
    }
}
