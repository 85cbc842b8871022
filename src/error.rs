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

//! Error types shared across the engine.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Top-level error for parsing, classification and detection.
///
/// Store and cache failures are propagated as-is; retry policy belongs to the
/// caller, which is expected to re-run the whole cycle.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("log source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Configuration(String),
}
