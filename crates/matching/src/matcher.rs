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

//! Symmetric give/get matching
//!
//! Two users match when each one offers something the other wants:
//!
//! ```text
//! B.give ∩ A.get ≠ ∅  AND  B.get ∩ A.give ≠ ∅
//! ```
//!
//! Candidates are ranked by the number of reciprocal items, then by who
//! started matching first. Only users that are online, currently matching,
//! inside the matching TTL and recently heartbeated take part.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use barter_sdk::{
	Activity, MatchCandidate, Presence, Route, Selection, UserRecord, intersect,
};
use barter_store::{
	Clock, DocumentStore, KeyValueStore, Query, QuerySnapshot, Subscription,
};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{self, USERS, user_key};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::notify::{Notification, show_system_notification};
use crate::scheduler::ScheduledTask;
use crate::services::Services;

/// Local cache of the last match list
pub const MATCHES_KEY: &str = "emblem.matches";

/// Eligibility windows for candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchPolicy {
	pub matching_ttl: Duration,
	pub liveness_window: Duration,
}

impl MatchPolicy {
	pub fn from_config(config: &ClientConfig) -> Self {
		Self {
			matching_ttl: config.matching_ttl(),
			liveness_window: config.liveness_window(),
		}
	}

	pub fn is_expired(&self, started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
		is_expired(started_at, now, self.matching_ttl)
	}

	pub fn is_recently_active(&self, last_active: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
		is_recently_active(last_active, now, self.liveness_window)
	}

	/// Online, matching, not expired and recently active
	pub fn is_eligible(&self, user: &UserRecord, now: DateTime<Utc>) -> bool {
		user.presence == Presence::Online
			&& user.activity == Activity::Matching
			&& !self.is_expired(user.matching_started_at, now)
			&& self.is_recently_active(user.last_active, now)
	}
}

impl Default for MatchPolicy {
	fn default() -> Self {
		Self::from_config(&ClientConfig::default())
	}
}

/// A missing start time counts as expired
pub fn is_expired(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
	match started_at {
		Some(started_at) => now - started_at > ttl,
		None => true,
	}
}

/// A missing heartbeat counts as inactive
pub fn is_recently_active(last_active: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
	match last_active {
		Some(last_active) => now - last_active <= window,
		None => false,
	}
}

/// Display name for a candidate without a nickname
pub fn fallback_nickname(uid: &str) -> String {
	let prefix: String = uid.chars().take(5).collect();
	format!("user-{}", prefix)
}

/// Rank the users that trade reciprocally with `me`
pub fn compute_matches(
	me: &str,
	mine: &Selection,
	candidates: &[UserRecord],
	now: DateTime<Utc>,
	policy: &MatchPolicy,
) -> Vec<MatchCandidate> {
	let mut matches: Vec<MatchCandidate> = candidates
		.iter()
		.filter(|user| user.uid != me)
		.filter(|user| policy.is_eligible(user, now))
		.filter_map(|user| {
			let get_items = intersect(&user.give_items, &mine.get_items);
			let give_items = intersect(&user.get_items, &mine.give_items);
			if get_items.is_empty() || give_items.is_empty() {
				return None;
			}
			Some(MatchCandidate {
				uid: user.uid.clone(),
				nickname: user
					.nickname
					.clone()
					.unwrap_or_else(|| fallback_nickname(&user.uid)),
				score: get_items.len() + give_items.len(),
				get_items,
				give_items,
				matching_started_at: user.matching_started_at,
				last_active: user.last_active,
			})
		})
		.collect();

	matches.sort_by(|a, b| {
		b.score
			.cmp(&a.score)
			.then_with(|| a.matching_started_at.cmp(&b.matching_started_at))
	});
	matches
}

fn matching_users_query() -> Query {
	Query::collection(USERS).where_eq("activity", Activity::Matching.as_str())
}

/// Reset every matching record whose session outlived the TTL
///
/// Returns the number of records reset. Failures on single records are
/// logged and skipped.
pub async fn cleanup_expired_matchings(
	store: &dyn DocumentStore,
	now: DateTime<Utc>,
	policy: &MatchPolicy,
) -> ClientResult<usize> {
	let mut reset = 0;
	for doc in store.query(&matching_users_query()).await? {
		let user = codec::decode_user(&doc);
		if !policy.is_expired(user.matching_started_at, now) {
			continue;
		}
		let patch = codec::presence_patch(user.presence, Activity::Idle)
			.delete("matchingStartedAt")
			.extend(codec::selection_patch(&Selection::default()));
		match store.set(&user_key(&user.uid), patch).await {
			Ok(()) => reset += 1,
			Err(err) => warn!(target: "matcher", uid = %user.uid, error = %err, "Failed to reset expired matching"),
		}
	}
	if reset > 0 {
		info!(target: "matcher", reset, "Expired matchings reset");
	}
	Ok(reset)
}

/// Publish `selection` and mark the user as matching
///
/// `keep_started_at` leaves an existing `matchingStartedAt` untouched.
pub async fn set_matching_state(
	store: &dyn DocumentStore,
	uid: &str,
	selection: &Selection,
	keep_started_at: bool,
) -> ClientResult<()> {
	let mut patch = codec::presence_patch(Presence::Online, Activity::Matching)
		.extend(codec::selection_patch(selection));
	if !keep_started_at {
		patch = patch.server_timestamp("matchingStartedAt");
	}
	store.set(&user_key(uid), patch).await?;
	Ok(())
}

/// Enter matching, resuming the running session when it is still valid
pub async fn ensure_matching_state(
	store: &dyn DocumentStore,
	uid: &str,
	selection: &Selection,
	resume: bool,
	now: DateTime<Utc>,
	policy: &MatchPolicy,
) -> ClientResult<()> {
	let keep = if resume {
		match store.get(&user_key(uid)).await? {
			Some(doc) => {
				let user = codec::decode_user(&doc);
				user.activity == Activity::Matching && !policy.is_expired(user.matching_started_at, now)
			}
			None => false,
		}
	} else {
		false
	};
	set_matching_state(store, uid, selection, keep).await?;
	debug!(target: "matcher", uid, resumed = keep, "Matching state written");
	Ok(())
}

/// Leave matching: online, idle, no start time
pub async fn cancel_matching(store: &dyn DocumentStore, uid: &str) -> ClientResult<()> {
	let patch = codec::presence_patch(Presence::Online, Activity::Idle).delete("matchingStartedAt");
	store.set(&user_key(uid), patch).await?;
	info!(target: "matcher", uid, "Matching canceled");
	Ok(())
}

/// Whether `uid` would see at least one candidate right now
pub async fn has_available_matches(
	store: &dyn DocumentStore,
	uid: &str,
	now: DateTime<Utc>,
	policy: &MatchPolicy,
) -> ClientResult<bool> {
	let Some(doc) = store.get(&user_key(uid)).await? else {
		return Ok(false);
	};
	let mine = codec::decode_user(&doc).selection();
	if !mine.is_valid() {
		return Ok(false);
	}
	let candidates: Vec<UserRecord> = store
		.query(&matching_users_query())
		.await?
		.iter()
		.map(codec::decode_user)
		.collect();
	Ok(!compute_matches(uid, &mine, &candidates, now, policy).is_empty())
}

/// Live ranked candidate list
pub struct MatchFeed {
	uid: String,
	selection: Selection,
	clock: Arc<dyn Clock>,
	policy: MatchPolicy,
	subscription: Subscription<QuerySnapshot>,
}

impl MatchFeed {
	/// Matches for the next snapshot of matching users
	pub async fn next(&mut self) -> Option<Vec<MatchCandidate>> {
		let snapshot = self.subscription.next().await?;
		let candidates: Vec<UserRecord> = snapshot.documents.iter().map(codec::decode_user).collect();
		Some(compute_matches(
			&self.uid,
			&self.selection,
			&candidates,
			self.clock.now(),
			&self.policy,
		))
	}

	pub fn unsubscribe(&mut self) {
		self.subscription.unsubscribe();
	}
}

/// Subscribe to the ranked matches of `uid` without managing its state
pub fn watch_potential_matches(services: &Services, uid: &str, selection: &Selection) -> ClientResult<MatchFeed> {
	Ok(MatchFeed {
		uid: uid.to_string(),
		selection: selection.normalized(),
		clock: services.clock.clone(),
		policy: services.policy(),
		subscription: services.store.watch_query(&matching_users_query())?,
	})
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent {
	/// Every snapshot, possibly empty
	Updated(Vec<MatchCandidate>),
	/// First candidate not listed before
	Found {
		candidate: MatchCandidate,
		matches: Vec<MatchCandidate>,
	},
	/// The own session outlived the TTL and was canceled
	Expired,
}

/// One user's matching period
///
/// Holds the live candidate listener and the expiry check. Dropping the
/// session stops both but leaves the user record as it is.
pub struct MatchingSession {
	uid: String,
	store: Arc<dyn DocumentStore>,
	listener: Option<ScheduledTask>,
	expiry: Option<ScheduledTask>,
	events: mpsc::UnboundedReceiver<MatchEvent>,
	closed: Arc<AtomicBool>,
	canceled: bool,
}

impl MatchingSession {
	pub async fn start(services: &Services, uid: &str, selection: &Selection, resume: bool) -> ClientResult<Self> {
		let selection = selection.normalized();
		if !selection.is_valid() {
			return Err(ClientError::InvalidSelection);
		}
		let policy = services.policy();
		let store = services.store.clone();

		ensure_matching_state(store.as_ref(), uid, &selection, resume, services.clock.now(), &policy).await?;
		if let Err(err) = cleanup_expired_matchings(store.as_ref(), services.clock.now(), &policy).await {
			warn!(target: "matcher", error = %err, "Cleanup of expired matchings failed");
		}

		let mut feed = watch_potential_matches(services, uid, &selection)?;
		let (sender, events) = mpsc::unbounded_channel();
		let closed = Arc::new(AtomicBool::new(false));

		let listener = {
			let sender = sender.clone();
			let closed = closed.clone();
			let notifier = services.notifier.clone();
			let local = services.local.clone();
			let uid = uid.to_string();
			ScheduledTask::spawn("match-listener", async move {
				let mut seen: HashSet<String> = HashSet::new();
				while let Some(matches) = feed.next().await {
					if closed.load(Ordering::SeqCst) {
						break;
					}
					cache_matches(local.as_ref(), &matches);
					if sender.send(MatchEvent::Updated(matches.clone())).is_err() {
						break;
					}
					if let Some(candidate) = matches.iter().find(|m| !seen.contains(&m.uid)).cloned() {
						info!(target: "matcher", %uid, partner = %candidate.uid, score = candidate.score, "New match");
						let body = format!(
							"{} can trade {} item(s) with you.",
							candidate.nickname, candidate.score
						);
						show_system_notification(
							notifier.as_ref(),
							"New match found",
							Notification::new(body).with_tag(format!("match-{}", candidate.uid)),
							&Route::Matches,
						);
						let found = MatchEvent::Found {
							candidate,
							matches: matches.clone(),
						};
						if sender.send(found).is_err() {
							break;
						}
					}
					seen.extend(matches.into_iter().map(|m| m.uid));
				}
				feed.unsubscribe();
			})
		};

		let expiry = {
			let store = store.clone();
			let clock = services.clock.clone();
			let closed = closed.clone();
			let uid = uid.to_string();
			ScheduledTask::every("match-expiry", services.config.expiry_check_interval(), move || {
				let store = store.clone();
				let clock = clock.clone();
				let closed = closed.clone();
				let sender = sender.clone();
				let uid = uid.clone();
				async move {
					let doc = match store.get(&user_key(&uid)).await {
						Ok(doc) => doc,
						Err(err) => {
							warn!(target: "matcher", %uid, error = %err, "Expiry check failed");
							return ControlFlow::Continue(());
						}
					};
					let Some(doc) = doc else {
						return ControlFlow::Continue(());
					};
					let user = codec::decode_user(&doc);
					if user.activity != Activity::Matching || !policy.is_expired(user.matching_started_at, clock.now()) {
						return ControlFlow::Continue(());
					}
					closed.store(true, Ordering::SeqCst);
					if let Err(err) = cancel_matching(store.as_ref(), &uid).await {
						warn!(target: "matcher", %uid, error = %err, "Failed to cancel expired matching");
					}
					info!(target: "matcher", %uid, "Matching session expired");
					let _ = sender.send(MatchEvent::Expired);
					ControlFlow::Break(())
				}
			})
		};

		info!(target: "matcher", uid, resume, "Matching started");
		Ok(Self {
			uid: uid.to_string(),
			store,
			listener: Some(listener),
			expiry: Some(expiry),
			events,
			closed,
			canceled: false,
		})
	}

	pub fn uid(&self) -> &str {
		&self.uid
	}

	/// Next event; `None` once the session is stopped and drained
	pub async fn next_event(&mut self) -> Option<MatchEvent> {
		self.events.recv().await
	}

	pub fn try_next_event(&mut self) -> Option<MatchEvent> {
		self.events.try_recv().ok()
	}

	pub fn is_running(&self) -> bool {
		!self.closed.load(Ordering::SeqCst) && self.listener.is_some()
	}

	/// Stop listening and checking expiry. Idempotent.
	pub fn stop(&mut self) {
		self.closed.store(true, Ordering::SeqCst);
		if let Some(mut listener) = self.listener.take() {
			listener.cancel();
		}
		if let Some(mut expiry) = self.expiry.take() {
			expiry.cancel();
		}
	}

	/// Stop and leave matching. Idempotent.
	pub async fn cancel(&mut self) -> ClientResult<()> {
		self.stop();
		if self.canceled {
			return Ok(());
		}
		cancel_matching(self.store.as_ref(), &self.uid).await?;
		self.canceled = true;
		Ok(())
	}
}

impl Drop for MatchingSession {
	fn drop(&mut self) {
		self.stop();
	}
}

fn cache_matches(local: &dyn KeyValueStore, matches: &[MatchCandidate]) {
	let result = serde_json::to_string(matches)
		.map_err(ClientError::from)
		.and_then(|raw| local.set(MATCHES_KEY, &raw).map_err(ClientError::from));
	if let Err(err) = result {
		warn!(target: "matcher", error = %err, "Failed to cache matches");
	}
}

/// Last cached match list; empty when missing or unreadable
pub fn load_cached_matches(local: &dyn KeyValueStore) -> Vec<MatchCandidate> {
	local
		.get(MATCHES_KEY)
		.and_then(|raw| serde_json::from_str(&raw).ok())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;

	const NOW: i64 = 10 * 24 * 60 * 60 * 1000;

	fn now() -> DateTime<Utc> {
		DateTime::from_timestamp_millis(NOW).unwrap()
	}

	fn user(uid: &str, give: &[&str], get: &[&str], started: i64, active: i64) -> UserRecord {
		UserRecord {
			uid: uid.to_string(),
			presence: Presence::Online,
			activity: Activity::Matching,
			give_items: give.iter().map(|s| s.to_string()).collect(),
			get_items: get.iter().map(|s| s.to_string()).collect(),
			matching_started_at: DateTime::from_timestamp_millis(started),
			last_active: DateTime::from_timestamp_millis(active),
			nickname: None,
		}
	}

	fn mine(give: &[&str], get: &[&str]) -> Selection {
		Selection::new(give.iter().copied(), get.iter().copied())
	}

	#[test]
	fn test_reciprocal_pair_matches() {
		let candidates = vec![user("b", &["y"], &["x"], NOW - 1_000, NOW)];
		let matches = compute_matches("a", &mine(&["x"], &["y"]), &candidates, now(), &MatchPolicy::default());
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].score, 2);
		assert_eq!(matches[0].get_items, vec!["y"]);
		assert_eq!(matches[0].give_items, vec!["x"]);
		assert_eq!(matches[0].nickname, "user-b");
	}

	#[test]
	fn test_one_sided_overlap_does_not_match() {
		let candidates = vec![user("b", &["z"], &["x"], NOW - 1_000, NOW)];
		let matches = compute_matches("a", &mine(&["x"], &["y"]), &candidates, now(), &MatchPolicy::default());
		assert!(matches.is_empty());
	}

	#[test]
	fn test_ranking_by_score_then_start_time() {
		let candidates = vec![
			user("late", &["y"], &["x"], NOW - 1_000, NOW),
			user("early", &["y"], &["x"], NOW - 5_000, NOW),
			user("best", &["y", "w"], &["x"], NOW, NOW),
		];
		let matches = compute_matches(
			"a",
			&mine(&["x"], &["y", "w"]),
			&candidates,
			now(),
			&MatchPolicy::default(),
		);
		let order: Vec<&str> = matches.iter().map(|m| m.uid.as_str()).collect();
		assert_eq!(order, vec!["best", "early", "late"]);
		assert_eq!(matches[0].score, 3);
	}

	#[test]
	fn test_ineligible_candidates_are_excluded() {
		let policy = MatchPolicy::default();
		let day = 24 * 60 * 60 * 1000;
		let mut offline = user("offline", &["y"], &["x"], NOW, NOW);
		offline.presence = Presence::Offline;
		let mut idle = user("idle", &["y"], &["x"], NOW, NOW);
		idle.activity = Activity::Idle;
		let mut unstarted = user("unstarted", &["y"], &["x"], NOW, NOW);
		unstarted.matching_started_at = None;
		let candidates = vec![
			user("a", &["y"], &["x"], NOW, NOW),
			offline,
			idle,
			unstarted,
			user("expired", &["y"], &["x"], NOW - day - 1, NOW),
			user("stale", &["y"], &["x"], NOW, NOW - 3 * 60 * 1000 - 1),
			user("fresh", &["y"], &["x"], NOW - day, NOW - 3 * 60 * 1000),
		];
		let matches = compute_matches("a", &mine(&["x"], &["y"]), &candidates, now(), &policy);
		let ids: Vec<&str> = matches.iter().map(|m| m.uid.as_str()).collect();
		assert_eq!(ids, vec!["fresh"]);
	}

	#[test]
	fn test_fallback_nickname() {
		assert_eq!(fallback_nickname("abcdefgh"), "user-abcde");
		assert_eq!(fallback_nickname("ab"), "user-ab");
	}
}
