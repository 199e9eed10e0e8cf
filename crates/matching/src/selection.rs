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

//! Give/get selections: item marks, local cache and the user record

use barter_sdk::{Activity, ItemMark, MarkStatus, Presence, Selection, unique_items};
use barter_store::{DocumentSnapshot, DocumentStore, KeyValueStore, Subscription};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::codec::{self, user_key};
use crate::error::ClientResult;

pub const SELECTION_KEY: &str = "emblem.selection";

/// `sell` marks become give items, `buy` marks get items
pub fn selection_from_items(items: &[ItemMark]) -> Selection {
	let pick = |status: MarkStatus| {
		unique_items(
			items
				.iter()
				.filter(|item| item.status == status)
				.map(|item| item.id.clone()),
		)
	};
	Selection {
		give_items: pick(MarkStatus::Sell),
		get_items: pick(MarkStatus::Buy),
	}
}

/// Mark each item from `selection`; give wins when an id is on both sides
pub fn apply_selection_to_items(items: &[ItemMark], selection: &Selection) -> Vec<ItemMark> {
	items
		.iter()
		.map(|item| {
			let status = if selection.give_items.contains(&item.id) {
				MarkStatus::Sell
			} else if selection.get_items.contains(&item.id) {
				MarkStatus::Buy
			} else {
				MarkStatus::Center
			};
			ItemMark::new(item.id.clone(), status)
		})
		.collect()
}

pub fn has_valid_selection(selection: &Selection) -> bool {
	selection.is_valid()
}

pub fn save_selection_to_storage(kv: &dyn KeyValueStore, selection: &Selection) -> ClientResult<()> {
	let raw = serde_json::to_string(&selection.normalized())?;
	kv.set(SELECTION_KEY, &raw)?;
	Ok(())
}

/// Cached selection; missing or unreadable entries give an empty one
pub fn load_selection_from_storage(kv: &dyn KeyValueStore) -> Selection {
	let Some(raw) = kv.get(SELECTION_KEY) else {
		return Selection::default();
	};
	match serde_json::from_str::<Selection>(&raw) {
		Ok(selection) => selection.normalized(),
		Err(err) => {
			warn!(target: "selection", error = %err, "Ignoring malformed cached selection");
			Selection::default()
		}
	}
}

pub async fn save_selection(store: &dyn DocumentStore, uid: &str, selection: &Selection) -> ClientResult<()> {
	let patch = codec::selection_patch(selection).server_timestamp("lastActive");
	store.set(&user_key(uid), patch).await?;
	debug!(
		target: "selection",
		uid,
		give = selection.give_items.len(),
		get = selection.get_items.len(),
		"Selection saved"
	);
	Ok(())
}

/// Stored selection of `uid`; empty when the record does not exist
pub async fn get_selection(store: &dyn DocumentStore, uid: &str) -> ClientResult<Selection> {
	Ok(store
		.get(&user_key(uid))
		.await?
		.map(|doc| codec::decode_user(&doc).selection())
		.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionUpdate {
	pub selection: Selection,
	pub presence: Presence,
	pub activity: Activity,
	/// Legacy single-token status
	pub status: String,
	pub matching_started_at: Option<DateTime<Utc>>,
	pub nickname: Option<String>,
}

/// Live view of one user's selection and status
pub struct SelectionWatch {
	subscription: Subscription<DocumentSnapshot>,
}

impl SelectionWatch {
	/// Next update; snapshots of a missing record are skipped
	pub async fn next(&mut self) -> Option<SelectionUpdate> {
		loop {
			let snapshot = self.subscription.next().await?;
			let Some(doc) = snapshot.document else {
				continue;
			};
			let user = codec::decode_user(&doc);
			return Some(SelectionUpdate {
				selection: user.selection(),
				presence: user.presence,
				activity: user.activity,
				status: codec::decode_status(&doc),
				matching_started_at: user.matching_started_at,
				nickname: user.nickname,
			});
		}
	}

	pub fn unsubscribe(&mut self) {
		self.subscription.unsubscribe();
	}
}

pub fn watch_selection(store: &dyn DocumentStore, uid: &str) -> ClientResult<SelectionWatch> {
	Ok(SelectionWatch {
		subscription: store.watch_document(&user_key(uid))?,
	})
}

#[cfg(test)]
mod tests {
	use barter_store::{MemoryDocumentStore, MemoryKeyValueStore, Patch};

	use super::*;

	fn marks(entries: &[(&str, MarkStatus)]) -> Vec<ItemMark> {
		entries
			.iter()
			.map(|(id, status)| ItemMark::new(*id, *status))
			.collect()
	}

	#[test]
	fn test_selection_from_items() {
		let items = marks(&[
			("a", MarkStatus::Sell),
			("b", MarkStatus::Buy),
			("c", MarkStatus::Center),
			("a", MarkStatus::Sell),
		]);
		let selection = selection_from_items(&items);
		assert_eq!(selection.give_items, vec!["a"]);
		assert_eq!(selection.get_items, vec!["b"]);
		assert!(has_valid_selection(&selection));
	}

	#[test]
	fn test_apply_selection_prefers_give() {
		let items = marks(&[
			("a", MarkStatus::Center),
			("b", MarkStatus::Sell),
			("c", MarkStatus::Center),
		]);
		let selection = Selection::new(["a"], ["a", "c"]);
		let applied = apply_selection_to_items(&items, &selection);
		assert_eq!(
			applied,
			marks(&[
				("a", MarkStatus::Sell),
				("b", MarkStatus::Center),
				("c", MarkStatus::Buy),
			])
		);
	}

	#[test]
	fn test_local_storage_tolerates_garbage() {
		let kv = MemoryKeyValueStore::new();
		assert_eq!(load_selection_from_storage(&kv), Selection::default());

		kv.set(SELECTION_KEY, "{not json").unwrap();
		assert_eq!(load_selection_from_storage(&kv), Selection::default());

		let selection = Selection::new(["x"], ["y"]);
		save_selection_to_storage(&kv, &selection).unwrap();
		assert_eq!(load_selection_from_storage(&kv), selection);
	}

	#[tokio::test]
	async fn test_remote_selection() {
		let store = MemoryDocumentStore::new();
		assert_eq!(get_selection(&store, "u1").await.unwrap(), Selection::default());

		let selection = Selection::new(["x", "x"], ["y"]);
		save_selection(&store, "u1", &selection).await.unwrap();
		let stored = get_selection(&store, "u1").await.unwrap();
		assert_eq!(stored, Selection::new(["x"], ["y"]));
	}

	#[tokio::test]
	async fn test_watch_selection_skips_missing_and_reads_legacy_status() {
		let store = MemoryDocumentStore::new();
		let mut watch = watch_selection(&store, "u1").unwrap();

		store
			.set(
				&user_key("u1"),
				Patch::new()
					.set("status", "matching")
					.set("giveItems", vec!["x"])
					.set("getItems", vec!["y"]),
			)
			.await
			.unwrap();

		let update = watch.next().await.unwrap();
		assert_eq!(update.activity, Activity::Matching);
		assert_eq!(update.presence, Presence::Online);
		assert_eq!(update.status, "matching");
		assert_eq!(update.selection, Selection::new(["x"], ["y"]));

		watch.unsubscribe();
		assert_eq!(watch.next().await, None);
	}
}
