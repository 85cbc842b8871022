// logsift - GPL-3.0-or-later
// This file is part of logsift.
//
// logsift is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// logsift is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with logsift.  If not, see <https://www.gnu.org/licenses/>.

//! Analyzer configuration loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::anomaly::detector::DetectorConfig;
use crate::error::AnalyzerError;
use crate::pattern::classify::ClassifierConfig;

/// Top-level configuration. Every section has working defaults; a missing
/// config file simply means "all defaults".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Files, or directories containing `*.log` files, to ingest.
    pub log_paths: Vec<PathBuf>,
    pub pattern: ClassifierConfig,
    pub anomaly: DetectorConfig,
}

impl AnalyzerConfig {
    /// Load configuration from `path`. A missing file yields defaults; an
    /// unreadable or malformed one is an error, because silently falling
    /// back would mask an operator mistake.
    pub fn load(path: &Path) -> Result<Self, AnalyzerError> {
        if !path.exists() {
            info!(config = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AnalyzerConfig = serde_json::from_str(&contents).map_err(|err| {
            AnalyzerError::Configuration(format!("{}: {err}", path.display()))
        })?;
        info!(
            config = %path.display(),
            log_paths = config.log_paths.len(),
            "loaded config"
        );
        Ok(config)
    }
}
