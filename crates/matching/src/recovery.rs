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

//! Chat recovery
//!
//! A user can lose the chat page at any time (closed tab, crash, dropped
//! connection) while the trade session stays open. Every page start checks
//! whether the user is already part of an open session and routes back
//! into it.
//!
//! # Phases
//!
//! 1. **Resolve**: explicit chat parameters, then the cached last chat, then
//!    the newest open session in the store.
//! 2. **Watch**: follow sessions that include the user and react to newly
//!    opened ones.
//! 3. **Poll**: periodically look for an open session as a fallback for
//!    missed realtime events.

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use barter_sdk::{
	CHAT_OPENED_MESSAGE, ChatParams, LEGACY_MATCH_REQUEST_MESSAGE, Route, TradeSession,
	build_chat_id,
};
use barter_store::{
	ChangeKind, DocumentStore, KeyValueStore, Query, QuerySnapshot, Subscription,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{self, CHATS};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::matcher::fallback_nickname;
use crate::notify::{Notification, show_system_notification};
use crate::scheduler::ScheduledTask;
use crate::services::Services;

pub const LAST_CHAT_KEY: &str = "emblem.lastChat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastChat {
	pub chat_id: String,
	#[serde(default)]
	pub partner_id: Option<String>,
}

pub fn save_last_chat(kv: &dyn KeyValueStore, chat_id: &str, partner_id: Option<&str>) {
	let entry = LastChat {
		chat_id: chat_id.to_string(),
		partner_id: partner_id.map(str::to_string),
	};
	let result = serde_json::to_string(&entry)
		.map_err(barter_store::KvError::from)
		.and_then(|raw| kv.set(LAST_CHAT_KEY, &raw));
	if let Err(err) = result {
		warn!(target: "recovery", error = %err, "Failed to cache last chat");
	}
}

/// Cached last chat; malformed entries are ignored
pub fn load_last_chat(kv: &dyn KeyValueStore) -> Option<LastChat> {
	let raw = kv.get(LAST_CHAT_KEY)?;
	serde_json::from_str::<LastChat>(&raw)
		.ok()
		.filter(|entry| !entry.chat_id.is_empty())
}

/// The session was freshly opened and waits for the other side
pub fn is_chat_open_signal(session: &TradeSession) -> bool {
	if session.chat_opened {
		return true;
	}
	session.last_message.as_deref().is_some_and(|message| {
		message.contains(CHAT_OPENED_MESSAGE) || message.contains(LEGACY_MATCH_REQUEST_MESSAGE)
	})
}

/// Open, not terminal and either the first look or newer than before
pub fn should_notify_incoming_chat(
	session: &TradeSession,
	updated_at_ms: i64,
	previous_ms: i64,
	initial: bool,
) -> bool {
	if session.is_terminal() || !is_chat_open_signal(session) {
		return false;
	}
	initial || updated_at_ms > previous_ms
}

fn updated_at_ms(session: &TradeSession) -> i64 {
	session
		.updated_at
		.map(|ts| ts.timestamp_millis())
		.unwrap_or(0)
}

fn sessions_of(uid: &str) -> Query {
	Query::collection(CHATS).where_array_contains("participants", uid)
}

/// Most recently updated open session of `uid`
///
/// On equal `updatedAt` the later session in result order wins.
pub async fn find_latest_open_chat_for_user(
	store: &dyn DocumentStore,
	uid: &str,
) -> ClientResult<Option<TradeSession>> {
	let mut latest: Option<(i64, TradeSession)> = None;
	for doc in store.query(&sessions_of(uid)).await? {
		let session = codec::decode_session(&doc);
		if session.is_terminal() || !is_chat_open_signal(&session) {
			continue;
		}
		let updated = updated_at_ms(&session);
		if latest.as_ref().is_none_or(|(best, _)| updated >= *best) {
			latest = Some((updated, session));
		}
	}
	Ok(latest.map(|(_, session)| session))
}

/// Sessions of one user that just opened
pub struct IncomingTradeWatch {
	subscription: Subscription<QuerySnapshot>,
	emit_initial: bool,
	bootstrapped: bool,
	seen: HashMap<String, i64>,
	pending: VecDeque<TradeSession>,
}

impl IncomingTradeWatch {
	pub async fn next(&mut self) -> Option<TradeSession> {
		loop {
			if let Some(session) = self.pending.pop_front() {
				return Some(session);
			}
			let snapshot = self.subscription.next().await?;
			if self.bootstrapped {
				self.apply_changes(snapshot);
			} else {
				self.bootstrap(snapshot);
			}
		}
	}

	/// Record every session; optionally surface the newest open one
	fn bootstrap(&mut self, snapshot: QuerySnapshot) {
		let mut newest: Option<(i64, TradeSession)> = None;
		for doc in &snapshot.documents {
			let session = codec::decode_session(doc);
			let updated = updated_at_ms(&session);
			self.seen.insert(session.chat_id.clone(), updated);
			if self.emit_initial
				&& should_notify_incoming_chat(&session, updated, 0, true)
				&& newest.as_ref().is_none_or(|(best, _)| updated > *best)
			{
				newest = Some((updated, session));
			}
		}
		if let Some((_, session)) = newest {
			self.pending.push_back(session);
		}
		self.bootstrapped = true;
	}

	fn apply_changes(&mut self, snapshot: QuerySnapshot) {
		for change in snapshot.changes {
			if change.kind == ChangeKind::Removed {
				self.seen.remove(&change.document.id);
				continue;
			}
			let session = codec::decode_session(&change.document);
			let updated = updated_at_ms(&session);
			let previous = self.seen.insert(session.chat_id.clone(), updated).unwrap_or(0);
			if should_notify_incoming_chat(&session, updated, previous, false) {
				self.pending.push_back(session);
			}
		}
	}

	pub fn unsubscribe(&mut self) {
		self.subscription.unsubscribe();
	}
}

pub fn watch_incoming_trade_requests(
	store: &dyn DocumentStore,
	uid: &str,
	emit_initial: bool,
) -> ClientResult<IncomingTradeWatch> {
	Ok(IncomingTradeWatch {
		subscription: store.watch_query(&sessions_of(uid))?,
		emit_initial,
		bootstrapped: false,
		seen: HashMap::new(),
		pending: VecDeque::new(),
	})
}

/// Work out which chat the chat page should show
///
/// Returns a chat route, or [`Route::Matches`] when there is nothing to
/// return to.
pub async fn resolve_chat_context(
	store: &dyn DocumentStore,
	kv: &dyn KeyValueStore,
	uid: &str,
	params: &ChatParams,
) -> ClientResult<Route> {
	let mut chat_id = params.chat_id.clone();
	let mut partner_id = params.partner_id.clone();

	if chat_id.is_none()
		&& let Some(cached) = load_last_chat(kv)
	{
		chat_id = Some(cached.chat_id);
		partner_id = cached.partner_id.or(partner_id);
	}

	if chat_id.is_none()
		&& let Some(partner) = partner_id.as_deref()
	{
		chat_id = Some(build_chat_id(uid, partner));
	}

	if let (Some(chat_id), Some(partner_id)) = (chat_id.as_deref(), partner_id.as_deref()) {
		save_last_chat(kv, chat_id, Some(partner_id));
	}

	if let Some(chat_id) = chat_id {
		return Ok(Route::chat(chat_id, partner_id));
	}

	match find_latest_open_chat_for_user(store, uid).await? {
		Some(session) => {
			let partner_id = session.partner_of(uid).map(str::to_string);
			debug!(target: "recovery", uid, chat_id = %session.chat_id, "Recovered chat from store");
			Ok(Route::chat(session.chat_id, partner_id))
		}
		None => {
			info!(target: "recovery", uid, "No chat to return to");
			Ok(Route::Matches)
		}
	}
}

/// Poll interval for the page a monitor runs on
pub fn poll_interval_for(page: &Route, config: &ClientConfig) -> Duration {
	match page {
		Route::Selection => config.selection_recovery_poll_interval(),
		_ => config.recovery_poll_interval(),
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
	OpenChat {
		chat_id: String,
		partner_id: Option<String>,
		partner_name: String,
	},
}

impl RecoveryEvent {
	pub fn route(&self) -> Route {
		match self {
			RecoveryEvent::OpenChat {
				chat_id,
				partner_id,
				..
			} => Route::chat(chat_id.clone(), partner_id.clone()),
		}
	}
}

struct MonitorShared {
	services: Services,
	uid: String,
	fired: AtomicBool,
	events: mpsc::UnboundedSender<RecoveryEvent>,
	tasks: Mutex<Option<Vec<ScheduledTask>>>,
}

impl MonitorShared {
	fn adopt(&self, mut task: ScheduledTask) {
		let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
		match tasks.as_mut() {
			Some(tasks) => tasks.push(task),
			None => task.cancel(),
		}
	}

	fn stop(&self) {
		let tasks = self
			.tasks
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		for mut task in tasks.into_iter().flatten() {
			task.cancel();
		}
	}

	async fn check(&self) {
		if self.fired.load(Ordering::SeqCst) {
			return;
		}
		match find_latest_open_chat_for_user(self.services.store.as_ref(), &self.uid).await {
			Ok(Some(session)) => self.fire(session),
			Ok(None) => {}
			Err(err) => warn!(target: "recovery", uid = %self.uid, error = %err, "Open chat lookup failed"),
		}
	}

	/// Emit the single open-chat event and shut the monitor down
	fn fire(&self, session: TradeSession) {
		if self.fired.swap(true, Ordering::SeqCst) {
			return;
		}
		let partner_id = session.partner_of(&self.uid).map(str::to_string);
		let partner_name = partner_id
			.as_deref()
			.map(|partner| {
				session
					.nickname_of(partner)
					.map(str::to_string)
					.unwrap_or_else(|| fallback_nickname(partner))
			})
			.unwrap_or_else(|| "Your partner".to_string());
		let route = Route::chat(session.chat_id.clone(), partner_id.clone());

		save_last_chat(self.services.local.as_ref(), &session.chat_id, partner_id.as_deref());
		show_system_notification(
			self.services.notifier.as_ref(),
			"Trade chat is open",
			Notification::new(format!("{} is waiting in a trade chat.", partner_name))
				.with_tag(format!("chat-{}", session.chat_id))
				.with_route(&route),
			&route,
		);
		info!(target: "recovery", uid = %self.uid, chat_id = %session.chat_id, "Routing back into open chat");

		let _ = self.events.send(RecoveryEvent::OpenChat {
			chat_id: session.chat_id,
			partner_id,
			partner_name,
		});
		self.stop();
	}
}

/// Finds an open chat for one user and reports it once
pub struct RecoveryMonitor {
	shared: Arc<MonitorShared>,
	events: mpsc::UnboundedReceiver<RecoveryEvent>,
}

impl RecoveryMonitor {
	/// Start watching and polling; the first check runs right away
	pub async fn start(services: &Services, uid: &str, poll_interval: Duration) -> ClientResult<Self> {
		let (sender, events) = mpsc::unbounded_channel();
		let shared = Arc::new(MonitorShared {
			services: services.clone(),
			uid: uid.to_string(),
			fired: AtomicBool::new(false),
			events: sender,
			tasks: Mutex::new(Some(Vec::new())),
		});

		let mut incoming = watch_incoming_trade_requests(services.store.as_ref(), uid, true)?;
		let watch_shared = shared.clone();
		shared.adopt(ScheduledTask::spawn("recovery-watch", async move {
			while let Some(session) = incoming.next().await {
				watch_shared.fire(session);
			}
		}));

		let poll_shared = shared.clone();
		shared.adopt(ScheduledTask::every("recovery-poll", poll_interval, move || {
			let shared = poll_shared.clone();
			async move {
				shared.check().await;
				if shared.fired.load(Ordering::SeqCst) {
					ControlFlow::Break(())
				} else {
					ControlFlow::Continue(())
				}
			}
		}));

		info!(target: "recovery", uid, poll_ms = poll_interval.as_millis() as u64, "Recovery monitor started");
		let monitor = Self { shared, events };
		monitor.notify_visible().await;
		Ok(monitor)
	}

	/// Check now, e.g. when the page becomes visible again
	pub async fn notify_visible(&self) {
		self.shared.check().await;
	}

	pub async fn next_event(&mut self) -> Option<RecoveryEvent> {
		self.events.recv().await
	}

	pub fn try_next_event(&mut self) -> Option<RecoveryEvent> {
		self.events.try_recv().ok()
	}

	pub fn has_fired(&self) -> bool {
		self.shared.fired.load(Ordering::SeqCst)
	}

	/// Stop watching and polling. Idempotent.
	pub fn stop(&self) {
		self.shared.stop();
	}
}

impl Drop for RecoveryMonitor {
	fn drop(&mut self) {
		self.shared.stop();
	}
}
