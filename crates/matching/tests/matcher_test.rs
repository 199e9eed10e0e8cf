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

//! Integration tests for matching sessions over the in-memory store

use std::sync::Arc;
use std::time::Duration;

use barter_matching::codec::{self, USERS, user_key};
use barter_matching::matcher::{
	cleanup_expired_matchings, has_available_matches, load_cached_matches,
};
use barter_matching::{ClientConfig, MatchEvent, MatchPolicy, MatchingSession, MemoryNotifier, Services};
use barter_sdk::{Activity, MatchCandidate, Presence, Selection};
use barter_store::{Clock, DocumentStore, ManualClock, MemoryDocumentStore, Patch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
	clock: Arc<ManualClock>,
	store: MemoryDocumentStore,
	notifier: Arc<MemoryNotifier>,
	services: Services,
}

fn fixture() -> Fixture {
	let clock = Arc::new(ManualClock::starting_at_millis(1_700_000_000_000));
	let store = MemoryDocumentStore::with_clock(clock.clone());
	let notifier = Arc::new(MemoryNotifier::granted());
	let services = Services::new(Arc::new(store.clone()), ClientConfig::default())
		.unwrap()
		.with_clock(clock.clone())
		.with_notifier(notifier.clone());
	Fixture {
		clock,
		store,
		notifier,
		services,
	}
}

/// A fresh, online user record with the given selection
async fn seed_user(store: &MemoryDocumentStore, uid: &str, give: &[&str], get: &[&str], activity: Activity) {
	let mut patch = codec::presence_patch(Presence::Online, activity)
		.extend(codec::selection_patch(&Selection::new(give.iter().copied(), get.iter().copied())))
		.set("nickname", uid);
	if activity == Activity::Matching {
		patch = patch.server_timestamp("matchingStartedAt");
	}
	store.set(&user_key(uid), patch).await.unwrap();
}

async fn next_found(session: &mut MatchingSession) -> MatchCandidate {
	timeout(WAIT, async {
		loop {
			match session.next_event().await {
				Some(MatchEvent::Found { candidate, .. }) => return candidate,
				Some(_) => continue,
				None => panic!("session stopped before a match"),
			}
		}
	})
	.await
	.expect("no match found in time")
}

#[tokio::test]
async fn test_session_reports_new_reciprocal_match() {
	let fx = fixture();
	let mine = Selection::new(["fox", "owl"], ["bear", "cat"]);
	let mut session = MatchingSession::start(&fx.services, "alice", &mine, false)
		.await
		.unwrap();

	let doc = fx.store.get(&user_key("alice")).await.unwrap().unwrap();
	assert_eq!(doc.str_field("activity"), Some("matching"));
	assert_eq!(doc.str_field("status"), Some("matching"));
	assert!(doc.timestamp("matchingStartedAt").is_some());

	seed_user(&fx.store, "bob", &["bear"], &["fox"], Activity::Matching).await;

	let candidate = next_found(&mut session).await;
	assert_eq!(candidate.uid, "bob");
	assert_eq!(candidate.nickname, "bob");
	assert_eq!(candidate.get_items, vec!["bear"]);
	assert_eq!(candidate.give_items, vec!["fox"]);
	assert_eq!(candidate.score, 2);

	let shown = fx.notifier.shown();
	assert_eq!(shown.len(), 1);
	assert_eq!(shown[0].0, "New match found");
	assert_eq!(shown[0].1.tag.as_deref(), Some("match-bob"));

	let cached = load_cached_matches(fx.services.local.as_ref());
	assert_eq!(cached.len(), 1);
	assert_eq!(cached[0].uid, "bob");

	session.cancel().await.unwrap();
	session.cancel().await.unwrap();
	assert!(!session.is_running());
	let doc = fx.store.get(&user_key("alice")).await.unwrap().unwrap();
	assert_eq!(doc.str_field("activity"), Some("idle"));
	assert_eq!(doc.str_field("status"), Some("online"));
	assert!(doc.get("matchingStartedAt").is_none());
}

#[tokio::test]
async fn test_heartbeats_do_not_announce_known_match_again() {
	let fx = fixture();
	let mine = Selection::new(["fox"], ["bear"]);
	let mut session = MatchingSession::start(&fx.services, "alice", &mine, false)
		.await
		.unwrap();

	seed_user(&fx.store, "bob", &["bear"], &["fox"], Activity::Matching).await;
	assert_eq!(next_found(&mut session).await.uid, "bob");

	for _ in 0..2 {
		fx.clock.advance(chrono::Duration::seconds(10));
		fx.store
			.update(&user_key("bob"), Patch::new().server_timestamp("lastActive"))
			.await
			.unwrap();
	}
	// Carol arrives last, so every earlier event is already queued
	seed_user(&fx.store, "carol", &["bear"], &["fox"], Activity::Matching).await;

	let candidate = next_found(&mut session).await;
	assert_eq!(candidate.uid, "carol");

	let shown = fx.notifier.shown();
	assert_eq!(shown.len(), 2);
	assert_eq!(shown[0].1.tag.as_deref(), Some("match-bob"));
	assert_eq!(shown[1].1.tag.as_deref(), Some("match-carol"));
	session.stop();
}

#[tokio::test]
async fn test_one_sided_overlap_is_not_found() {
	let fx = fixture();
	let mine = Selection::new(["fox"], ["bear"]);
	let mut session = MatchingSession::start(&fx.services, "alice", &mine, false)
		.await
		.unwrap();

	// Bob has what alice wants but wants nothing alice gives
	seed_user(&fx.store, "bob", &["bear"], &["cat"], Activity::Matching).await;
	seed_user(&fx.store, "carol", &["bear"], &["fox"], Activity::Matching).await;

	let candidate = next_found(&mut session).await;
	assert_eq!(candidate.uid, "carol");
	session.stop();
}

#[tokio::test]
async fn test_invalid_selection_is_rejected() {
	let fx = fixture();
	let half = Selection::new(["fox"], Vec::<&str>::new());
	let result = MatchingSession::start(&fx.services, "alice", &half, false).await;
	assert_eq!(result.err().map(|e| e.code().to_string()).as_deref(), Some("invalid-selection"));
	assert_eq!(fx.store.document_count(USERS), 0);
}

#[tokio::test]
async fn test_resume_keeps_start_time() {
	let fx = fixture();
	let mine = Selection::new(["fox"], ["bear"]);
	let mut first = MatchingSession::start(&fx.services, "alice", &mine, false).await.unwrap();
	first.stop();
	let started = fx.store.get(&user_key("alice")).await.unwrap().unwrap().millis("matchingStartedAt");

	fx.clock.advance(chrono::Duration::seconds(90));
	let mut resumed = MatchingSession::start(&fx.services, "alice", &mine, true).await.unwrap();
	resumed.stop();
	let doc = fx.store.get(&user_key("alice")).await.unwrap().unwrap();
	assert_eq!(doc.millis("matchingStartedAt"), started);

	let mut fresh = MatchingSession::start(&fx.services, "alice", &mine, false).await.unwrap();
	fresh.stop();
	let doc = fx.store.get(&user_key("alice")).await.unwrap().unwrap();
	assert_eq!(doc.millis("matchingStartedAt"), started + 90_000);
}

#[tokio::test]
async fn test_cleanup_resets_only_expired_records() {
	let fx = fixture();
	let policy = MatchPolicy::default();
	seed_user(&fx.store, "old1", &["fox"], &["bear"], Activity::Matching).await;
	seed_user(&fx.store, "old2", &["owl"], &["cat"], Activity::Matching).await;

	fx.clock.advance(chrono::Duration::seconds(86_401));
	seed_user(&fx.store, "fresh", &["fox"], &["bear"], Activity::Matching).await;

	let reset = cleanup_expired_matchings(&fx.store, fx.clock.now(), &policy).await.unwrap();
	assert_eq!(reset, 2);

	let old = fx.store.get(&user_key("old1")).await.unwrap().unwrap();
	assert_eq!(old.str_field("activity"), Some("idle"));
	assert!(old.get("matchingStartedAt").is_none());
	assert!(old.string_list("giveItems").is_empty());

	let fresh = fx.store.get(&user_key("fresh")).await.unwrap().unwrap();
	assert_eq!(fresh.str_field("activity"), Some("matching"));

	let reset = cleanup_expired_matchings(&fx.store, fx.clock.now(), &policy).await.unwrap();
	assert_eq!(reset, 0);
}

#[tokio::test]
async fn test_has_available_matches_follows_liveness() {
	let fx = fixture();
	let policy = MatchPolicy::default();
	seed_user(&fx.store, "alice", &["fox"], &["bear"], Activity::Idle).await;
	seed_user(&fx.store, "bob", &["bear"], &["fox"], Activity::Matching).await;
	seed_user(&fx.store, "carol", &["owl"], &["cat"], Activity::Idle).await;

	let now = fx.clock.now();
	assert!(has_available_matches(&fx.store, "alice", now, &policy).await.unwrap());
	assert!(!has_available_matches(&fx.store, "carol", now, &policy).await.unwrap());
	assert!(!has_available_matches(&fx.store, "nobody", now, &policy).await.unwrap());

	// Bob stopped heartbeating
	fx.clock.advance(chrono::Duration::seconds(181));
	let now = fx.clock.now();
	assert!(!has_available_matches(&fx.store, "alice", now, &policy).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_session_expires_after_ttl() {
	let fx = fixture();
	let mine = Selection::new(["fox"], ["bear"]);
	let mut session = MatchingSession::start(&fx.services, "alice", &mine, false)
		.await
		.unwrap();

	fx.clock.advance(chrono::Duration::seconds(86_401));
	tokio::time::sleep(fx.services.config.expiry_check_interval() + Duration::from_secs(1)).await;

	let expired = timeout(WAIT, async {
		while let Some(event) = session.next_event().await {
			if event == MatchEvent::Expired {
				return true;
			}
		}
		false
	})
	.await
	.unwrap();
	assert!(expired);
	assert!(!session.is_running());

	let doc = fx.store.get(&user_key("alice")).await.unwrap().unwrap();
	assert_eq!(doc.str_field("activity"), Some("idle"));
	assert_eq!(doc.str_field("presence"), Some("online"));
	assert!(doc.get("matchingStartedAt").is_none());
}

#[tokio::test]
async fn test_store_outage_surfaces_as_error() {
	let fx = fixture();
	fx.store.set_available(false);
	let err = MatchingSession::start(&fx.services, "alice", &Selection::new(["fox"], ["bear"]), false)
		.await
		.err()
		.unwrap();
	assert_eq!(err.code(), "network-request-failed");
}
