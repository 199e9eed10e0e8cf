// Copyright 2025 itscheems
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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default heartbeat interval in seconds (can be overridden by BARTER_HEARTBEAT_INTERVAL_SECS environment variable)
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;

/// Default matching TTL in seconds (can be overridden by BARTER_MATCHING_TTL_SECS environment variable)
pub const DEFAULT_MATCHING_TTL_SECS: u64 = 24 * 60 * 60;

/// Default liveness window in seconds (can be overridden by BARTER_LIVENESS_WINDOW_SECS environment variable)
///
/// A candidate without a heartbeat inside this window is treated as absent.
pub const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 3 * 60;

/// Default interval of the own-expiry check while matching
pub const DEFAULT_EXPIRY_CHECK_INTERVAL_SECS: u64 = 30;

/// Default chat recovery poll on the match list and support pages
pub const DEFAULT_RECOVERY_POLL_INTERVAL_MS: u64 = 1500;

/// Default chat recovery poll on the selection page
pub const DEFAULT_SELECTION_RECOVERY_POLL_INTERVAL_MS: u64 = 5000;

/// How long a "partner came online" notice stays visible
pub const DEFAULT_PRESENCE_NOTICE_DURATION_MS: u64 = 4000;

/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default console output flag (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

/// Log component name, used for the log sub-directory and file prefix
pub const LOG_COMPONENT_NAME: &str = "barter";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Interval between `lastActive` refreshes
	pub heartbeat_interval_secs: u64,
	/// Age after which a matching session is expired
	pub matching_ttl_secs: u64,
	/// Maximum heartbeat age of an eligible candidate
	pub liveness_window_secs: u64,
	/// Interval of the own-expiry check while matching
	pub expiry_check_interval_secs: u64,
	/// Chat recovery poll on the match list and support pages
	pub recovery_poll_interval_ms: u64,
	/// Chat recovery poll on the selection page
	pub selection_recovery_poll_interval_ms: u64,
	pub presence_notice_duration_ms: u64,
	/// JSON file for durable local storage; in-memory when unset
	pub local_storage_path: Option<String>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
			matching_ttl_secs: DEFAULT_MATCHING_TTL_SECS,
			liveness_window_secs: DEFAULT_LIVENESS_WINDOW_SECS,
			expiry_check_interval_secs: DEFAULT_EXPIRY_CHECK_INTERVAL_SECS,
			recovery_poll_interval_ms: DEFAULT_RECOVERY_POLL_INTERVAL_MS,
			selection_recovery_poll_interval_ms: DEFAULT_SELECTION_RECOVERY_POLL_INTERVAL_MS,
			presence_notice_duration_ms: DEFAULT_PRESENCE_NOTICE_DURATION_MS,
			local_storage_path: None,
		}
	}
}

impl ClientConfig {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix("BARTER").try_parsing(true))
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix("BARTER").try_parsing(true))
			.build()?;

		cfg.try_deserialize()
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_secs(self.heartbeat_interval_secs)
	}

	pub fn expiry_check_interval(&self) -> Duration {
		Duration::from_secs(self.expiry_check_interval_secs)
	}

	pub fn recovery_poll_interval(&self) -> Duration {
		Duration::from_millis(self.recovery_poll_interval_ms)
	}

	pub fn selection_recovery_poll_interval(&self) -> Duration {
		Duration::from_millis(self.selection_recovery_poll_interval_ms)
	}

	pub fn presence_notice_duration(&self) -> Duration {
		Duration::from_millis(self.presence_notice_duration_ms)
	}

	pub fn matching_ttl(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.matching_ttl_secs as i64)
	}

	pub fn liveness_window(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.liveness_window_secs as i64)
	}
}
