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

use std::sync::Arc;

use barter_store::{
	Clock, DocumentStore, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, SystemClock,
};

use crate::auth::{AuthProvider, LocalAnonymousAuth};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::matcher::MatchPolicy;
use crate::notify::{LogNotifier, Notifier};

/// Collaborators shared by every component of one client
#[derive(Clone)]
pub struct Services {
	pub store: Arc<dyn DocumentStore>,
	/// Survives restarts
	pub local: Arc<dyn KeyValueStore>,
	/// Cleared with the session
	pub session: Arc<dyn KeyValueStore>,
	pub clock: Arc<dyn Clock>,
	pub notifier: Arc<dyn Notifier>,
	pub auth: Arc<dyn AuthProvider>,
	pub config: ClientConfig,
}

impl Services {
	/// Local storage from `config.local_storage_path` (memory when unset),
	/// log-only notifications and anonymous local identities
	pub fn new(store: Arc<dyn DocumentStore>, config: ClientConfig) -> ClientResult<Self> {
		let local: Arc<dyn KeyValueStore> = match &config.local_storage_path {
			Some(path) => Arc::new(FileKeyValueStore::open(path)?),
			None => Arc::new(MemoryKeyValueStore::new()),
		};
		Ok(Self {
			store,
			auth: Arc::new(LocalAnonymousAuth::new(local.clone())),
			local,
			session: Arc::new(MemoryKeyValueStore::new()),
			clock: Arc::new(SystemClock),
			notifier: Arc::new(LogNotifier),
			config,
		})
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
		self.notifier = notifier;
		self
	}

	pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
		self.auth = auth;
		self
	}

	pub fn policy(&self) -> MatchPolicy {
		MatchPolicy::from_config(&self.config)
	}
}
