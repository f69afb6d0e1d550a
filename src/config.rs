use firmware::FlashLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MpFlashError, Result};

pub const DEFAULT_SCRIPT: &str = r#"# Add your Python code here. E.g.
from microbit import *


while True:
    display.scroll('Hello, World!')
    display.show(Image.HEART)
    sleep(2000)
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: FlashLayout,
    /// Seeded as `main.py` when a session starts.
    pub initial_script: String,
    /// Used fraction above which storage is reported as almost full.
    pub almost_full_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            layout: FlashLayout::default(),
            initial_script: DEFAULT_SCRIPT.to_string(),
            almost_full_ratio: 0.98,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.layout
            .validate()
            .map_err(|e| MpFlashError::InvalidConfig(e.to_string()))?;

        if !(self.almost_full_ratio > 0.0 && self.almost_full_ratio <= 1.0) {
            return Err(MpFlashError::InvalidConfig(format!(
                "almost_full_ratio {} must be in (0, 1]",
                self.almost_full_ratio
            )));
        }
        Ok(())
    }
}
