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

//! Local string key-value persistence
//!
//! Two instances are used by a client: a durable one (display name, last
//! selection, last chat, cached matches) and a session-scoped one (the
//! "matching in progress" flag).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::error::KvError;

pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Option<String>;

	fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

	fn remove(&self, key: &str) -> Result<(), KvError>;
}

/// Non-persistent store, also used for session scope
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
	entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl KeyValueStore for MemoryKeyValueStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.get(key).map(|entry| entry.value().clone())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
		self.entries.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), KvError> {
		self.entries.remove(key);
		Ok(())
	}
}

/// JSON-file backed store, written through on every change
#[derive(Debug)]
pub struct FileKeyValueStore {
	path: PathBuf,
	entries: DashMap<String, String>,
}

impl FileKeyValueStore {
	/// Open `path`, starting empty when the file does not exist yet
	pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
		let path = path.as_ref().to_path_buf();
		let entries = DashMap::new();
		if path.exists() {
			let raw = fs::read_to_string(&path)?;
			if !raw.trim().is_empty() {
				let stored: BTreeMap<String, String> = serde_json::from_str(&raw)?;
				for (key, value) in stored {
					entries.insert(key, value);
				}
			}
		}
		Ok(Self { path, entries })
	}

	fn flush(&self) -> Result<(), KvError> {
		let snapshot: BTreeMap<String, String> = self
			.entries
			.iter()
			.map(|entry| (entry.key().clone(), entry.value().clone()))
			.collect();
		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			fs::create_dir_all(parent)?;
		}
		let tmp = self.path.with_extension("tmp");
		fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
		fs::rename(&tmp, &self.path)?;
		Ok(())
	}
}

impl KeyValueStore for FileKeyValueStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.get(key).map(|entry| entry.value().clone())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
		self.entries.insert(key.to_string(), value.to_string());
		self.flush()
	}

	fn remove(&self, key: &str) -> Result<(), KvError> {
		self.entries.remove(key);
		self.flush()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_memory_store_roundtrip() {
		let store = MemoryKeyValueStore::new();
		assert_eq!(store.get("k"), None);
		store.set("k", "v").unwrap();
		assert_eq!(store.get("k").as_deref(), Some("v"));
		store.remove("k").unwrap();
		assert_eq!(store.get("k"), None);
	}

	#[test]
	fn test_file_store_persists_across_reopen() {
		let dir = std::env::temp_dir().join(format!("barter-kv-{}", uuid::Uuid::new_v4()));
		let path = dir.join("local.json");

		let store = FileKeyValueStore::open(&path).unwrap();
		store.set("emblem.nickname", "Brave Hunter 123").unwrap();
		drop(store);

		let reopened = FileKeyValueStore::open(&path).unwrap();
		assert_eq!(
			reopened.get("emblem.nickname").as_deref(),
			Some("Brave Hunter 123")
		);

		fs::remove_dir_all(dir).ok();
	}
}
