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

use thiserror::Error;

/// Error types for document store operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	#[error("Document not found: {0}")]
	NotFound(String),
	#[error("Store unavailable (network-request-failed): {0}")]
	Unavailable(String),
	#[error("Missing or insufficient permissions: {0}")]
	PermissionDenied(String),
	#[error("Invalid field path: {0}")]
	InvalidPath(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
}

impl StoreError {
	/// Stable machine-readable error code
	pub fn code(&self) -> &'static str {
		match self {
			StoreError::NotFound(_) => "not-found",
			StoreError::Unavailable(_) => "network-request-failed",
			StoreError::PermissionDenied(_) => "permission-denied",
			StoreError::InvalidPath(_) => "invalid-argument",
			StoreError::Serialization(_) => "data-loss",
		}
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(err: serde_json::Error) -> Self {
		StoreError::Serialization(err.to_string())
	}
}

/// Error types for local key-value persistence
#[derive(Debug, Error)]
pub enum KvError {
	#[error("Storage I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Storage serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
