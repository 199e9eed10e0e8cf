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

//! Integration tests for routing users back into open chats

use std::sync::Arc;
use std::time::Duration;

use barter_matching::codec::chat_key;
use barter_matching::recovery::{
	LastChat, find_latest_open_chat_for_user, load_last_chat, resolve_chat_context, save_last_chat,
	watch_incoming_trade_requests,
};
use barter_matching::{ClientConfig, MemoryNotifier, RecoveryEvent, RecoveryMonitor, Services};
use barter_sdk::{CHAT_OPENED_MESSAGE, ChatParams, Route, build_chat_id};
use barter_store::{
	DocumentStore, KeyValueStore, ManualClock, MemoryDocumentStore, MemoryKeyValueStore, Patch,
};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn clock() -> Arc<ManualClock> {
	Arc::new(ManualClock::starting_at_millis(1_700_000_000_000))
}

/// Write an open session between `a` (initiator) and `b`
async fn open_chat(store: &MemoryDocumentStore, a: &str, b: &str) -> String {
	let chat_id = build_chat_id(a, b);
	let patch = Patch::new()
		.set("participants", vec![a, b])
		.set(format!("participantNicknames.{}", a), format!("{}-nick", a))
		.set("initiatorId", a)
		.set("chatOpened", true)
		.set("isCompleted", false)
		.set("isCanceled", false)
		.set("lastMessage", CHAT_OPENED_MESSAGE)
		.set("lastSenderId", a)
		.server_timestamp("updatedAt");
	store.set(&chat_key(&chat_id), patch).await.unwrap();
	chat_id
}

#[tokio::test]
async fn test_latest_open_chat_wins() {
	let clock = clock();
	let store = MemoryDocumentStore::with_clock(clock.clone());

	let older = open_chat(&store, "u2", "u1").await;
	clock.advance(chrono::Duration::seconds(5));
	let newer = open_chat(&store, "u3", "u1").await;
	clock.advance(chrono::Duration::seconds(5));
	let canceled = open_chat(&store, "u4", "u1").await;
	store
		.update(&chat_key(&canceled), Patch::new().set("isCanceled", true))
		.await
		.unwrap();

	let latest = find_latest_open_chat_for_user(&store, "u1").await.unwrap().unwrap();
	assert_eq!(latest.chat_id, newer);
	assert_ne!(latest.chat_id, older);

	assert!(find_latest_open_chat_for_user(&store, "u9").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resolve_chat_context_sources() {
	let store = MemoryDocumentStore::with_clock(clock());
	let kv = MemoryKeyValueStore::new();

	// Explicit parameters win and are remembered
	let params = ChatParams::new(Some("c1".to_string()), Some("u2".to_string()));
	let route = resolve_chat_context(&store, &kv, "u1", &params).await.unwrap();
	assert_eq!(route, Route::chat("c1", Some("u2".to_string())));
	assert_eq!(
		load_last_chat(&kv),
		Some(LastChat {
			chat_id: "c1".to_string(),
			partner_id: Some("u2".to_string()),
		})
	);

	// Nothing given: the remembered chat
	let route = resolve_chat_context(&store, &kv, "u1", &ChatParams::default()).await.unwrap();
	assert_eq!(route, Route::chat("c1", Some("u2".to_string())));

	// Partner only: the deterministic id of the pair
	let fresh = MemoryKeyValueStore::new();
	let params = ChatParams::new(None, Some("u3".to_string()));
	let route = resolve_chat_context(&store, &fresh, "u1", &params).await.unwrap();
	assert_eq!(route, Route::chat(build_chat_id("u1", "u3"), Some("u3".to_string())));

	// Nothing anywhere: back to matches
	let empty = MemoryKeyValueStore::new();
	let route = resolve_chat_context(&store, &empty, "u1", &ChatParams::default()).await.unwrap();
	assert_eq!(route, Route::Matches);

	// Only the store knows
	let chat_id = open_chat(&store, "u5", "u1").await;
	let route = resolve_chat_context(&store, &empty, "u1", &ChatParams::default()).await.unwrap();
	assert_eq!(route, Route::chat(chat_id, Some("u5".to_string())));
}

#[tokio::test]
async fn test_malformed_last_chat_is_ignored() {
	let kv = MemoryKeyValueStore::new();
	kv.set("emblem.lastChat", "{not json").unwrap();
	assert_eq!(load_last_chat(&kv), None);

	save_last_chat(&kv, "c1", None);
	assert_eq!(load_last_chat(&kv).map(|c| c.chat_id), Some("c1".to_string()));
}

#[tokio::test]
async fn test_incoming_watch_skips_existing_sessions() {
	let clock = clock();
	let store = MemoryDocumentStore::with_clock(clock.clone());
	open_chat(&store, "u2", "u1").await;

	let mut watch = watch_incoming_trade_requests(&store, "u1", false).unwrap();
	clock.advance(chrono::Duration::seconds(1));
	let incoming = open_chat(&store, "u3", "u1").await;

	let session = timeout(WAIT, watch.next()).await.unwrap().unwrap();
	assert_eq!(session.chat_id, incoming);
	assert_eq!(session.partner_of("u1"), Some("u3"));
	watch.unsubscribe();
}

#[tokio::test]
async fn test_incoming_watch_can_surface_initial_session() {
	let clock = clock();
	let store = MemoryDocumentStore::with_clock(clock.clone());
	open_chat(&store, "u2", "u1").await;
	clock.advance(chrono::Duration::seconds(1));
	let newest = open_chat(&store, "u3", "u1").await;

	let mut watch = watch_incoming_trade_requests(&store, "u1", true).unwrap();
	let session = timeout(WAIT, watch.next()).await.unwrap().unwrap();
	assert_eq!(session.chat_id, newest);
}

#[tokio::test]
async fn test_monitor_fires_once_for_incoming_chat() {
	let clock = clock();
	let store = MemoryDocumentStore::with_clock(clock.clone());
	let notifier = Arc::new(MemoryNotifier::granted());
	let services = Services::new(Arc::new(store.clone()), ClientConfig::default())
		.unwrap()
		.with_clock(clock.clone())
		.with_notifier(notifier.clone());

	let mut monitor = RecoveryMonitor::start(&services, "u1", Duration::from_millis(1500))
		.await
		.unwrap();
	assert!(!monitor.has_fired());

	let chat_id = open_chat(&store, "u2", "u1").await;
	let event = timeout(WAIT, monitor.next_event()).await.unwrap().unwrap();
	assert_eq!(
		event,
		RecoveryEvent::OpenChat {
			chat_id: chat_id.clone(),
			partner_id: Some("u2".to_string()),
			partner_name: "u2-nick".to_string(),
		}
	);
	assert_eq!(event.route(), Route::chat(chat_id.clone(), Some("u2".to_string())));
	assert!(monitor.has_fired());

	let shown = notifier.shown();
	assert_eq!(shown.len(), 1);
	assert_eq!(shown[0].1.tag, Some(format!("chat-{}", chat_id)));
	assert_eq!(load_last_chat(services.local.as_ref()).map(|c| c.chat_id), Some(chat_id));

	// Later chats and visibility checks do not fire again
	clock.advance(chrono::Duration::seconds(1));
	open_chat(&store, "u3", "u1").await;
	monitor.notify_visible().await;
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(monitor.try_next_event().is_none());
}

#[tokio::test]
async fn test_monitor_finds_existing_chat_right_away() {
	let store = MemoryDocumentStore::with_clock(clock());
	let chat_id = open_chat(&store, "u2", "u1").await;
	let services = Services::new(Arc::new(store.clone()), ClientConfig::default())
		.unwrap()
		.with_notifier(Arc::new(MemoryNotifier::granted()));

	let mut monitor = RecoveryMonitor::start(&services, "u1", Duration::from_secs(5))
		.await
		.unwrap();
	assert!(monitor.has_fired());
	let event = monitor.try_next_event().unwrap();
	assert_eq!(event.route(), Route::chat(chat_id, Some("u2".to_string())));
	assert!(monitor.try_next_event().is_none());
}
