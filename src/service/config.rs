// Copyright 2025 The framelink authors
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

extern crate config as _;

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    /// bound on concurrently active server-side connections; also sizes the
    /// peer pool and the admission semaphore
    pub max_connections: usize,
    /// initial capacity of the per-peer scratch read buffer
    pub read_buffer_size: usize,
    /// inbound frames declaring a larger body close the peer; `None` means
    /// unlimited
    pub max_frame_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 9966,
            max_connections: 64,
            read_buffer_size: 4 * 1024,
            max_frame_size: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct FrameworkConfig {
    pub network: NetworkConfig,
}

impl FrameworkConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<FrameworkConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let framework_config: FrameworkConfig = config.try_deserialize()?;

        Ok(framework_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_set_up_config_from_toml() -> AppResult<()> {
        let mut temp_file = NamedTempFile::with_suffix(".toml")?;
        writeln!(
            temp_file,
            "[network]\nip = \"0.0.0.0\"\nport = 7000\nmax_connections = 8\nread_buffer_size = 8192\nmax_frame_size = 1048576\n"
        )?;

        let config = FrameworkConfig::set_up_config(temp_file.path())?;
        assert_eq!(config.network.ip, "0.0.0.0");
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.max_connections, 8);
        assert_eq!(config.network.read_buffer_size, 8192);
        assert_eq!(config.network.max_frame_size, Some(1024 * 1024));
        Ok(())
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let result = FrameworkConfig::set_up_config("no/such/conf.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }
}
