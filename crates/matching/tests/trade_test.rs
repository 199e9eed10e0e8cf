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

//! Integration tests for trade sessions between two clients

use std::sync::Arc;
use std::time::Duration;

use barter_matching::codec::{self, chat_key, messages_collection, user_key};
use barter_matching::trade::{confirmed_message, withdrawn_message};
use barter_matching::{
	ChatEntry, Client, ClientConfig, Identity, MemoryNotifier, RoomEvent, Services, TradeRoom,
};
use barter_sdk::{
	Activity, CHAT_CANCELED_MESSAGE, CHAT_OPENED_MESSAGE, ChatParams, MatchCandidate, Presence,
	Route, Selection, TRADE_COMPLETED_MESSAGE,
};
use barter_store::{DocumentStore, ManualClock, MemoryDocumentStore, Patch, Query};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Pair {
	store: MemoryDocumentStore,
	alice: Client,
	bob: Client,
	alice_id: Identity,
	bob_id: Identity,
}

fn client(store: &MemoryDocumentStore, clock: &Arc<ManualClock>) -> Client {
	let services = Services::new(Arc::new(store.clone()), ClientConfig::default())
		.unwrap()
		.with_clock(clock.clone())
		.with_notifier(Arc::new(MemoryNotifier::granted()));
	Client::new(services)
}

async fn pair() -> Pair {
	let clock = Arc::new(ManualClock::starting_at_millis(1_700_000_000_000));
	let store = MemoryDocumentStore::with_clock(clock.clone());
	let alice = client(&store, &clock);
	let bob = client(&store, &clock);
	let alice_id = alice.init().await.unwrap();
	let bob_id = bob.init().await.unwrap();
	Pair {
		store,
		alice,
		bob,
		alice_id,
		bob_id,
	}
}

fn candidate(of: &Identity) -> MatchCandidate {
	MatchCandidate {
		uid: of.uid.clone(),
		nickname: of.nickname.clone(),
		get_items: vec!["bear".to_string()],
		give_items: vec!["fox".to_string()],
		score: 2,
		matching_started_at: None,
		last_active: None,
	}
}

async fn enter(client: &Client, chat_id: &str, partner: &Identity) -> TradeRoom {
	let params = ChatParams::new(Some(chat_id.to_string()), Some(partner.uid.clone()));
	match client.open_trade_room(&params).await.unwrap() {
		ChatEntry::Room(room) => room,
		ChatEntry::Redirect(route) => panic!("unexpected redirect to {}", route),
	}
}

/// Alice requests, then both enter the room
async fn open_trade(pair: &Pair) -> (String, TradeRoom, TradeRoom) {
	let route = pair.alice.request_trade(&candidate(&pair.bob_id)).await.unwrap();
	let Route::Chat { chat_id, partner_id } = route else {
		panic!("request_trade must route to the chat");
	};
	assert_eq!(partner_id.as_deref(), Some(pair.bob_id.uid.as_str()));
	let alice_room = enter(&pair.alice, &chat_id, &pair.bob_id).await;
	let bob_room = enter(&pair.bob, &chat_id, &pair.alice_id).await;
	(chat_id, alice_room, bob_room)
}

async fn wait_routed(room: &mut TradeRoom) -> Route {
	if let Some(route) = room.routed() {
		return route;
	}
	timeout(WAIT, async {
		loop {
			match room.next_event().await {
				Some(RoomEvent::Routed(route)) => return route,
				Some(_) => continue,
				None => panic!("room closed before routing"),
			}
		}
	})
	.await
	.expect("room was not routed in time")
}

async fn count_messages(store: &MemoryDocumentStore, chat_id: &str, text: &str) -> usize {
	store
		.query(&Query::collection(messages_collection(chat_id)))
		.await
		.unwrap()
		.iter()
		.filter(|doc| doc.str_field("text") == Some(text))
		.count()
}

#[tokio::test]
async fn test_request_trade_writes_open_session() {
	let pair = pair().await;
	let (chat_id, _alice_room, _bob_room) = open_trade(&pair).await;

	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.chat_opened);
	assert!(!session.is_terminal());
	assert_eq!(session.initiator(), Some(pair.alice_id.uid.as_str()));
	assert_eq!(session.nickname_of(&pair.bob_id.uid), Some(pair.bob_id.nickname.as_str()));
	assert_eq!(session.selection_for(&pair.alice_id.uid), Selection::new(["fox"], ["bear"]));
	assert_eq!(session.selection_for(&pair.bob_id.uid), Selection::new(["bear"], ["fox"]));
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_OPENED_MESSAGE).await, 1);

	for uid in [&pair.alice_id.uid, &pair.bob_id.uid] {
		let user = pair.store.get(&user_key(uid)).await.unwrap().unwrap();
		assert_eq!(user.str_field("activity"), Some("trading"));
		assert_eq!(user.str_field("status"), Some("trading"));
	}
}

#[tokio::test]
async fn test_both_confirmations_complete_once() {
	let pair = pair().await;
	let (chat_id, mut alice_room, mut bob_room) = open_trade(&pair).await;

	assert_eq!(alice_room.toggle_completion().await.unwrap(), Some(true));
	assert_eq!(bob_room.toggle_completion().await.unwrap(), Some(true));

	assert_eq!(wait_routed(&mut alice_room).await, Route::Selection);
	assert_eq!(wait_routed(&mut bob_room).await, Route::Selection);

	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.is_completed);
	assert!(!session.chat_opened);
	assert!(session.completed_at.is_some());
	assert_eq!(count_messages(&pair.store, &chat_id, TRADE_COMPLETED_MESSAGE).await, 1);

	let user = pair.store.get(&user_key(&pair.alice_id.uid)).await.unwrap().unwrap();
	assert_eq!(user.str_field("activity"), Some("idle"));
	assert_eq!(user.str_field("status"), Some("online"));

	// Terminal sessions ignore further input
	assert_eq!(alice_room.toggle_completion().await.unwrap(), None);
	assert!(!alice_room.send_message("still there?").await.unwrap());
	assert_eq!(bob_room.cancel().await.unwrap(), None);
}

#[tokio::test]
async fn test_concurrent_finalize_commits_exactly_once() {
	let pair = pair().await;
	let (chat_id, alice_room, bob_room) = open_trade(&pair).await;
	// Take the listeners out of the race
	alice_room.close();
	bob_room.close();

	let key = chat_key(&chat_id);
	pair.store
		.update(
			&key,
			Patch::new()
				.set(format!("completedBy.{}", pair.alice_id.uid), true)
				.set(format!("completedBy.{}", pair.bob_id.uid), true),
		)
		.await
		.unwrap();

	let (a, b) = tokio::join!(alice_room.maybe_finalize(), bob_room.maybe_finalize());
	let (a, b) = (a.unwrap(), b.unwrap());

	assert!(a ^ b, "exactly one finalizer must win, got {} and {}", a, b);
	assert_eq!(count_messages(&pair.store, &chat_id, TRADE_COMPLETED_MESSAGE).await, 1);
	let doc = pair.store.get(&key).await.unwrap().unwrap();
	assert_eq!(doc.bool_field("isCompleted"), Some(true));
}

#[tokio::test]
async fn test_toggle_sets_and_removes_confirmation() {
	let pair = pair().await;
	let (chat_id, alice_room, _bob_room) = open_trade(&pair).await;
	let key = chat_key(&chat_id);
	let path = format!("completedBy.{}", pair.alice_id.uid);

	assert_eq!(alice_room.toggle_completion().await.unwrap(), Some(true));
	let doc = pair.store.get(&key).await.unwrap().unwrap();
	assert_eq!(doc.bool_field(&path), Some(true));

	assert_eq!(alice_room.toggle_completion().await.unwrap(), Some(false));
	let doc = pair.store.get(&key).await.unwrap().unwrap();
	assert!(doc.get(&path).is_none());
	assert_eq!(doc.bool_field("isCompleted"), Some(false));

	let nickname = &pair.alice_id.nickname;
	assert_eq!(count_messages(&pair.store, &chat_id, &confirmed_message(nickname)).await, 1);
	assert_eq!(count_messages(&pair.store, &chat_id, &withdrawn_message(nickname)).await, 1);
	assert_eq!(doc.str_field("lastMessage"), Some(withdrawn_message(nickname).as_str()));
}

#[tokio::test]
async fn test_cancel_without_candidates_sends_both_home() {
	let pair = pair().await;
	let (chat_id, alice_room, mut bob_room) = open_trade(&pair).await;

	assert_eq!(alice_room.cancel().await.unwrap(), Some(Route::Selection));
	assert_eq!(alice_room.cancel().await.unwrap(), None);
	assert_eq!(wait_routed(&mut bob_room).await, Route::Selection);

	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.is_canceled);
	assert!(!session.chat_opened);
	assert_eq!(session.canceled_by.as_deref(), Some(pair.alice_id.uid.as_str()));
	assert!(session.canceled_at.is_some());
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_CANCELED_MESSAGE).await, 1);

	let bob = pair.store.get(&user_key(&pair.bob_id.uid)).await.unwrap().unwrap();
	assert_eq!(bob.str_field("status"), Some("online"));
}

#[tokio::test]
async fn test_cancel_returns_partner_to_matching_when_candidates_remain() {
	let pair = pair().await;
	let (_chat_id, alice_room, mut bob_room) = open_trade(&pair).await;
	seed_candidate_for_bob(&pair).await;

	assert_eq!(alice_room.cancel().await.unwrap(), Some(Route::Selection));
	assert_eq!(wait_routed(&mut bob_room).await, Route::Matches);

	let bob = pair.store.get(&user_key(&pair.bob_id.uid)).await.unwrap().unwrap();
	assert_eq!(bob.str_field("activity"), Some("matching"));
	assert_eq!(bob.str_field("status"), Some("matching"));
	let alice = pair.store.get(&user_key(&pair.alice_id.uid)).await.unwrap().unwrap();
	assert_eq!(alice.str_field("status"), Some("online"));
}

/// Give bob a stored selection and carol a live reciprocal one
async fn seed_candidate_for_bob(pair: &Pair) {
	pair.store
		.set(
			&user_key(&pair.bob_id.uid),
			codec::selection_patch(&Selection::new(["bear"], ["fox"])),
		)
		.await
		.unwrap();
	pair.store
		.set(
			&user_key("carol"),
			codec::presence_patch(Presence::Online, Activity::Matching)
				.extend(codec::selection_patch(&Selection::new(["fox"], ["bear"])))
				.server_timestamp("matchingStartedAt"),
		)
		.await
		.unwrap();
}

#[tokio::test]
async fn test_partner_cancel_with_candidates_returns_to_matching() {
	let pair = pair().await;
	let (chat_id, mut alice_room, bob_room) = open_trade(&pair).await;
	seed_candidate_for_bob(&pair).await;

	assert_eq!(bob_room.cancel().await.unwrap(), Some(Route::Matches));
	assert_eq!(wait_routed(&mut alice_room).await, Route::Selection);

	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.is_canceled);
	assert_eq!(session.canceled_by.as_deref(), Some(pair.bob_id.uid.as_str()));
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_CANCELED_MESSAGE).await, 1);

	let bob = pair.store.get(&user_key(&pair.bob_id.uid)).await.unwrap().unwrap();
	assert_eq!(bob.str_field("activity"), Some("matching"));
	assert_eq!(bob.str_field("status"), Some("matching"));
	let alice = pair.store.get(&user_key(&pair.alice_id.uid)).await.unwrap().unwrap();
	assert_eq!(alice.str_field("activity"), Some("idle"));
	assert_eq!(alice.str_field("status"), Some("online"));
}

#[tokio::test]
async fn test_partner_cancel_without_candidates_sends_both_home() {
	let pair = pair().await;
	let (chat_id, mut alice_room, bob_room) = open_trade(&pair).await;

	assert_eq!(bob_room.cancel().await.unwrap(), Some(Route::Selection));
	assert_eq!(wait_routed(&mut alice_room).await, Route::Selection);
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_CANCELED_MESSAGE).await, 1);

	let bob = pair.store.get(&user_key(&pair.bob_id.uid)).await.unwrap().unwrap();
	assert_eq!(bob.str_field("status"), Some("online"));
}

#[tokio::test]
async fn test_cancel_leaves_completed_session_untouched() {
	let pair = pair().await;
	let (chat_id, alice_room, bob_room) = open_trade(&pair).await;
	// The completion lands without alice's room seeing it
	alice_room.close();
	bob_room.close();

	let key = chat_key(&chat_id);
	pair.store
		.update(
			&key,
			Patch::new()
				.set(format!("completedBy.{}", pair.alice_id.uid), true)
				.set(format!("completedBy.{}", pair.bob_id.uid), true)
				.set("isCompleted", true)
				.set("chatOpened", false),
		)
		.await
		.unwrap();

	assert_eq!(alice_room.cancel().await.unwrap(), Some(Route::Selection));

	let doc = pair.store.get(&key).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.is_completed);
	assert!(!session.is_canceled);
	assert!(session.canceled_by.is_none());
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_CANCELED_MESSAGE).await, 0);
}

#[tokio::test]
async fn test_retrade_clears_earlier_round() {
	let pair = pair().await;
	let (chat_id, alice_room, bob_room) = open_trade(&pair).await;
	alice_room.close();
	bob_room.close();

	pair.store
		.update(
			&chat_key(&chat_id),
			Patch::new()
				.set(format!("completedBy.{}", pair.alice_id.uid), true)
				.set(format!("completedBy.{}", pair.bob_id.uid), true)
				.set("isCompleted", true)
				.set("chatOpened", false),
		)
		.await
		.unwrap();

	pair.alice.request_trade(&candidate(&pair.bob_id)).await.unwrap();
	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	let session = codec::decode_session(&doc);
	assert!(session.completed_by.is_empty());
	assert!(!session.is_terminal());
	assert!(session.chat_opened);
	assert_eq!(count_messages(&pair.store, &chat_id, CHAT_OPENED_MESSAGE).await, 2);
}

#[tokio::test]
async fn test_send_message_ignores_blank_text() {
	let pair = pair().await;
	let (chat_id, alice_room, mut bob_room) = open_trade(&pair).await;

	assert!(!alice_room.send_message("   ").await.unwrap());
	assert!(alice_room.send_message("  fox for bear?  ").await.unwrap());

	let doc = pair.store.get(&chat_key(&chat_id)).await.unwrap().unwrap();
	assert_eq!(doc.str_field("lastMessage"), Some("fox for bear?"));
	assert_eq!(doc.str_field("lastSenderId"), Some(pair.alice_id.uid.as_str()));

	let seen = timeout(WAIT, async {
		loop {
			match bob_room.next_event().await {
				Some(RoomEvent::Messages(messages))
					if messages.iter().any(|m| m.text == "fox for bear?") =>
				{
					return messages;
				}
				Some(_) => continue,
				None => panic!("room closed"),
			}
		}
	})
	.await
	.unwrap();
	assert_eq!(seen.first().map(|m| m.text.as_str()), Some(CHAT_OPENED_MESSAGE));
}
