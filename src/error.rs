// Copyright 2025 Phalanx Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types

use std::fmt;

/// Engine error type
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Malformed prefab or scenario data
    Config(String),

    /// Model path could not be resolved
    Asset(String),

    /// Navigation grid dimensions are not positive
    InvalidGrid { width: i32, height: i32 },

    /// IO error (file operations)
    Io(String),

    /// JSON parse error
    Json(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "Configuration error: {msg}"),
            EngineError::Asset(msg) => write!(f, "Asset error: {msg}"),
            EngineError::InvalidGrid { width, height } => {
                write!(f, "Invalid nav grid dimensions: {width}x{height}")
            }
            EngineError::Io(msg) => write!(f, "IO error: {msg}"),
            EngineError::Json(msg) => write!(f, "JSON error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Json(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
