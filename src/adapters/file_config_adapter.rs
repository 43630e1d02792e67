//! INI file configuration adapter.
//!
//! Section and key names are case-insensitive. Values are trimmed; an empty
//! value counts as unset.

use std::path::Path;

use configparser::ini::Ini;

use crate::domain::error::PapertradeError;
use crate::ports::config_port::ConfigPort;

pub struct FileConfigAdapter {
    ini: Ini,
    origin: String,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PapertradeError> {
        let origin = path.as_ref().display().to_string();
        let mut ini = Ini::new();
        ini.load(path.as_ref())
            .map_err(|reason| PapertradeError::ConfigParse {
                file: origin.clone(),
                reason,
            })?;
        tracing::debug!(file = %origin, sections = ini.sections().len(), "config loaded");
        Ok(Self { ini, origin })
    }

    /// Parse INI text held in memory. Errors name the source as `<inline>`.
    pub fn from_string(content: &str) -> Result<Self, PapertradeError> {
        let origin = "<inline>".to_string();
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| PapertradeError::ConfigParse {
                file: origin.clone(),
                reason,
            })?;
        Ok(Self { ini, origin })
    }

}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini
            .get(section, key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        let Some(raw) = self.get_string(section, key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    file = %self.origin,
                    section,
                    key,
                    value = %raw,
                    default,
                    "not a whole number, using default"
                );
                default
            }
        }
    }
}
