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

//! Anonymous identity providers

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use barter_store::KeyValueStore;
use tracing::info;

use crate::error::{ClientError, ClientResult};

pub const UID_KEY: &str = "emblem.uid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
	pub uid: String,
	pub is_anonymous: bool,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
	/// Sign in, reusing the previous identity when one is remembered
	async fn sign_in_anonymously(&self) -> ClientResult<AuthUser>;

	fn current_user(&self) -> Option<AuthUser>;
}

/// Identity kept in local storage as a v4 UUID
pub struct LocalAnonymousAuth {
	kv: Arc<dyn KeyValueStore>,
	enabled: bool,
	current: Mutex<Option<AuthUser>>,
}

impl LocalAnonymousAuth {
	pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
		Self {
			kv,
			enabled: true,
			current: Mutex::new(None),
		}
	}

	/// Provider with anonymous sign-in turned off; every sign-in fails
	pub fn disabled(kv: Arc<dyn KeyValueStore>) -> Self {
		Self {
			enabled: false,
			..Self::new(kv)
		}
	}
}

#[async_trait]
impl AuthProvider for LocalAnonymousAuth {
	async fn sign_in_anonymously(&self) -> ClientResult<AuthUser> {
		if !self.enabled {
			return Err(ClientError::Auth {
				code: "auth/operation-not-allowed".to_string(),
				message: "anonymous sign-in is disabled".to_string(),
			});
		}

		let uid = match self.kv.get(UID_KEY).filter(|uid| !uid.is_empty()) {
			Some(uid) => uid,
			None => {
				let uid = uuid::Uuid::new_v4().simple().to_string();
				self.kv.set(UID_KEY, &uid)?;
				info!(target: "presence", %uid, "Created anonymous identity");
				uid
			}
		};

		let user = AuthUser {
			uid,
			is_anonymous: true,
		};
		*self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(user.clone());
		Ok(user)
	}

	fn current_user(&self) -> Option<AuthUser> {
		self.current
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use barter_store::MemoryKeyValueStore;

	use super::*;

	#[tokio::test]
	async fn test_identity_is_stable() {
		let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
		let auth = LocalAnonymousAuth::new(kv.clone());
		assert_eq!(auth.current_user(), None);

		let first = auth.sign_in_anonymously().await.unwrap();
		let second = LocalAnonymousAuth::new(kv)
			.sign_in_anonymously()
			.await
			.unwrap();
		assert_eq!(first.uid, second.uid);
		assert_eq!(auth.current_user(), Some(first));
	}

	#[tokio::test]
	async fn test_disabled_provider_fails() {
		let auth = LocalAnonymousAuth::disabled(Arc::new(MemoryKeyValueStore::new()));
		let err = auth.sign_in_anonymously().await.unwrap_err();
		assert_eq!(err.code(), "auth/operation-not-allowed");
		assert!(err.hint().contains("Anonymous sign-in is disabled"));
	}
}
