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

use barter_sdk::ParseStatusError;
use barter_store::{KvError, StoreError};
use thiserror::Error;

/// Error types for client operations
#[derive(Debug, Error)]
pub enum ClientError {
	#[error(transparent)]
	Store(#[from] StoreError),
	#[error("Local storage error: {0}")]
	Storage(#[from] KvError),
	#[error("Sign-in failed ({code}): {message}")]
	Auth { code: String, message: String },
	#[error("This environment does not support the Notifications API")]
	NotificationsUnsupported,
	#[error("Notification permission was not granted")]
	NotificationPermissionDenied,
	#[error(transparent)]
	InvalidStatus(#[from] ParseStatusError),
	#[error("Selection needs at least one give item and one get item")]
	InvalidSelection,
	#[error("Trade session not found: {0}")]
	SessionNotFound(String),
	#[error("User {uid} is not a participant of {chat_id}")]
	NotParticipant { uid: String, chat_id: String },
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("No signed-in user")]
	NotSignedIn,
}

impl ClientError {
	/// Stable machine-readable error code
	pub fn code(&self) -> &str {
		match self {
			ClientError::Store(err) => err.code(),
			ClientError::Storage(_) => "storage-unavailable",
			ClientError::Auth { code, .. } => code.as_str(),
			ClientError::NotificationsUnsupported => "notifications/unsupported",
			ClientError::NotificationPermissionDenied => "notifications/permission-not-granted",
			ClientError::InvalidStatus(_) => "invalid-status",
			ClientError::InvalidSelection => "invalid-selection",
			ClientError::SessionNotFound(_) => "not-found",
			ClientError::NotParticipant { .. } => "not-participant",
			ClientError::Serialization(_) => "data-loss",
			ClientError::NotSignedIn => "auth/no-current-user",
		}
	}

	/// Human-readable hint for an initialization failure
	pub fn hint(&self) -> String {
		init_error_hint(self.code(), &self.to_string())
	}
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Map an initialization failure to something a user can act on
pub fn init_error_hint(code: &str, message: &str) -> String {
	let haystack = format!("{} {}", code, message).to_lowercase();
	let has = |needle: &str| haystack.contains(needle);

	if has("admin_only_operation") || has("operation-not-allowed") {
		return "Anonymous sign-in is disabled. Enable the anonymous provider in the authentication settings.".to_string();
	}
	if has("unauthorized-domain") || has("unauthorized_domain") {
		return "This origin is not on the list of authorized domains.".to_string();
	}
	if has("permission-denied") || has("missing or insufficient permissions") {
		return "Access rules are rejecting reads or writes for this user.".to_string();
	}
	if has("network-request-failed") {
		return "The request failed because of a network or firewall problem.".to_string();
	}
	if has("notifications api") || has("notification") {
		return "Check notification permission and Notifications API support.".to_string();
	}

	let code = if code.is_empty() { "unknown" } else { code };
	let message = if message.is_empty() {
		"unknown cause"
	} else {
		message
	};
	format!("code: {} / message: {}", code, message)
}
