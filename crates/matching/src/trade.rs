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

//! Trade session lifecycle
//!
//! # States
//!
//! ```text
//! open ──(every participant confirmed, transaction)──> completed
//!   └───(either participant leaves)──────────────────> canceled
//! ```
//!
//! Both terminal states are final; only message appends follow.
//!
//! # Finalization
//!
//! Each participant's confirmation is a single merged field
//! (`completedBy.{uid}`), so toggles never conflict. The transition to
//! `completed` runs in a transaction that re-reads the session and commits
//! only if it is still open and fully confirmed. When both clients race to
//! finalize, exactly one commits and only that one appends the completion
//! message. Cancellation commits under the same guard, so a session that
//! already completed is never marked canceled.
//!
//! # Routing
//!
//! A [`TradeRoom`] leaves at most once. After completion both users go home.
//! After cancellation the initiator goes home and the other user returns to
//! matching when candidates are still available.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use barter_sdk::{
	CHAT_CANCELED_MESSAGE, CHAT_OPENED_MESSAGE, ChatMessage, MatchCandidate, MessageKind,
	Presence, Route, StatusToken, TRADE_COMPLETED_MESSAGE, TradeSession, build_chat_id,
};
use barter_store::{DocumentStore, Patch, Query, TransactionWrite};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{self, chat_key, messages_collection, user_key};
use crate::error::{ClientError, ClientResult};
use crate::matcher::has_available_matches;
use crate::presence::PresenceTracker;
use crate::recovery::save_last_chat;
use crate::scheduler::ScheduledTask;
use crate::services::Services;

pub fn confirmed_message(nickname: &str) -> String {
	format!("{} confirmed the trade.", nickname)
}

pub fn withdrawn_message(nickname: &str) -> String {
	format!("{} withdrew their trade confirmation.", nickname)
}

async fn append_message(
	store: &dyn DocumentStore,
	chat_id: &str,
	sender_id: &str,
	text: &str,
	kind: MessageKind,
) -> ClientResult<()> {
	store
		.add(&messages_collection(chat_id), codec::message_patch(sender_id, text, kind))
		.await?;
	Ok(())
}

/// Open a trade session with `candidate` and switch to trading
///
/// Returns the chat route to navigate to.
pub async fn request_trade(
	services: &Services,
	presence: &PresenceTracker,
	me: &str,
	nickname: &str,
	candidate: &MatchCandidate,
) -> ClientResult<Route> {
	let partner = candidate.uid.as_str();
	let chat_id = build_chat_id(me, partner);

	let mut nicknames = serde_json::Map::new();
	nicknames.insert(me.to_string(), Value::from(nickname));
	nicknames.insert(partner.to_string(), Value::from(candidate.nickname.as_str()));

	let mut selections = serde_json::Map::new();
	selections.insert(
		me.to_string(),
		json!({ "giveItems": candidate.give_items, "getItems": candidate.get_items }),
	);
	selections.insert(
		partner.to_string(),
		json!({ "giveItems": candidate.get_items, "getItems": candidate.give_items }),
	);

	// A pair may trade again; confirmations of an earlier round must not leak
	let patch = Patch::new()
		.set("participants", vec![me, partner])
		.set("participantNicknames", Value::Object(nicknames))
		.delete("selectionByUser")
		.set("selectionByUser", Value::Object(selections))
		.set("initiatorId", me)
		.set("chatOpened", true)
		.set("lastMessage", CHAT_OPENED_MESSAGE)
		.set("lastSenderId", me)
		.server_timestamp("updatedAt")
		.set("isCompleted", false)
		.delete("completedBy")
		.set("completedBy", json!({}))
		.set("isCanceled", false)
		.set("canceledBy", Value::Null)
		.set("canceledAt", Value::Null);
	services.store.set(&chat_key(&chat_id), patch).await?;
	append_message(
		services.store.as_ref(),
		&chat_id,
		me,
		CHAT_OPENED_MESSAGE,
		MessageKind::System,
	)
	.await?;

	presence.set_status(me, StatusToken::Trading, Patch::new()).await?;
	save_last_chat(services.local.as_ref(), &chat_id, Some(partner));

	info!(target: "trade", %chat_id, me, partner, score = candidate.score, "Trade requested");
	Ok(Route::chat(chat_id, Some(partner.to_string())))
}

/// Online/offline view of the partner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartnerPresence {
	pub online: bool,
	/// The partner just switched from offline to online
	pub came_online: bool,
}

/// Edge detector for partner presence
///
/// The first observation only records the state.
#[derive(Debug, Default)]
pub struct PartnerPresenceTracker {
	last: Option<bool>,
}

impl PartnerPresenceTracker {
	pub fn observe(&mut self, online: bool) -> PartnerPresence {
		let came_online = self.last == Some(false) && online;
		self.last = Some(online);
		PartnerPresence {
			online,
			came_online,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
	/// Latest session state
	Session(TradeSession),
	/// All messages, oldest first
	Messages(Vec<ChatMessage>),
	Partner(PartnerPresence),
	/// The "partner came online" notice should be hidden
	PartnerNoticeExpired,
	/// The room was left; no further events follow
	Routed(Route),
}

#[derive(Default)]
struct RoomState {
	session: Option<TradeSession>,
	partner_id: Option<String>,
	/// Completion or cancellation was handled
	handled: bool,
	cancelling: bool,
	routed: Option<Route>,
	partner_watch_started: bool,
}

struct RoomShared {
	services: Services,
	presence: Arc<PresenceTracker>,
	uid: String,
	nickname: String,
	chat_id: String,
	state: Mutex<RoomState>,
	tasks: Mutex<Option<Vec<ScheduledTask>>>,
	events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomShared {
	fn state(&self) -> MutexGuard<'_, RoomState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn store(&self) -> &dyn DocumentStore {
		self.services.store.as_ref()
	}

	fn emit(&self, event: RoomEvent) {
		let _ = self.events.send(event);
	}

	/// Keep `task` alive with the room; cancelled at once if the room closed
	fn adopt(&self, mut task: ScheduledTask) {
		let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
		match tasks.as_mut() {
			Some(tasks) => tasks.push(task),
			None => task.cancel(),
		}
	}

	fn stop_tasks(&self) {
		let tasks = self
			.tasks
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		for mut task in tasks.into_iter().flatten() {
			task.cancel();
		}
	}

	async fn fetch_session(&self) -> ClientResult<Option<TradeSession>> {
		Ok(self
			.store()
			.get(&chat_key(&self.chat_id))
			.await?
			.map(|doc| codec::decode_session(&doc)))
	}

	async fn send_message(&self, text: &str) -> ClientResult<bool> {
		let text = text.trim();
		if text.is_empty() || self.state().handled {
			return Ok(false);
		}
		append_message(self.store(), &self.chat_id, &self.uid, text, MessageKind::Text).await?;
		self.store()
			.update(
				&chat_key(&self.chat_id),
				Patch::new()
					.set("lastMessage", text)
					.set("lastSenderId", self.uid.as_str())
					.server_timestamp("updatedAt"),
			)
			.await?;
		Ok(true)
	}

	async fn toggle_completion(&self) -> ClientResult<Option<bool>> {
		if self.state().handled {
			return Ok(None);
		}
		let session = self
			.fetch_session()
			.await?
			.ok_or_else(|| ClientError::SessionNotFound(self.chat_id.clone()))?;
		if session.is_terminal() {
			return Ok(None);
		}

		let path = format!("completedBy.{}", self.uid);
		let (patch, text, confirmed) = if session.has_confirmed(&self.uid) {
			(Patch::new().delete(path), withdrawn_message(&self.nickname), false)
		} else {
			(Patch::new().set(path, true), confirmed_message(&self.nickname), true)
		};
		let patch = patch
			.set("lastMessage", text.as_str())
			.set("lastSenderId", self.uid.as_str())
			.server_timestamp("updatedAt");

		self.store().update(&chat_key(&self.chat_id), patch).await?;
		append_message(self.store(), &self.chat_id, &self.uid, &text, MessageKind::System).await?;
		info!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, confirmed, "Completion toggled");
		Ok(Some(confirmed))
	}

	async fn maybe_finalize(&self) -> ClientResult<bool> {
		let key = chat_key(&self.chat_id);
		let uid = self.uid.clone();
		let write_key = key.clone();
		let decide = move |current: &[Option<barter_store::Document>]| {
			let doc = current.first()?.as_ref()?;
			let session = codec::decode_session(doc);
			if session.is_terminal() || !session.all_confirmed() {
				return None;
			}
			Some(vec![TransactionWrite {
				key: write_key.clone(),
				patch: Patch::new()
					.set("isCompleted", true)
					.set("chatOpened", false)
					.set("lastMessage", TRADE_COMPLETED_MESSAGE)
					.set("lastSenderId", uid.as_str())
					.server_timestamp("updatedAt")
					.server_timestamp("completedAt"),
			}])
		};

		let committed = self.store().transaction(&[key], &decide).await?;
		if !committed {
			debug!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, "Finalization skipped");
			return Ok(false);
		}
		append_message(
			self.store(),
			&self.chat_id,
			&self.uid,
			TRADE_COMPLETED_MESSAGE,
			MessageKind::System,
		)
		.await?;
		info!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, "Trade finalized");
		Ok(true)
	}

	/// Write `status`, stop every listener and report the route, once
	async fn route_to(&self, route: Route, status: StatusToken) -> Route {
		{
			let mut state = self.state();
			if let Some(existing) = &state.routed {
				return existing.clone();
			}
			state.routed = Some(route.clone());
			state.handled = true;
		}

		if let Err(err) = self.presence.set_status(&self.uid, status, Patch::new()).await {
			warn!(target: "trade", uid = %self.uid, error = %err, "Status update before leaving failed");
		}
		info!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, route = %route, "Leaving trade room");
		self.emit(RoomEvent::Routed(route.clone()));
		self.stop_tasks();
		route
	}

	async fn route_after_completion(&self) -> Route {
		self.route_to(Route::Selection, StatusToken::Online).await
	}

	async fn route_after_cancellation(&self, session: &TradeSession) -> Route {
		if let Some(existing) = self.state().routed.clone() {
			return existing;
		}
		if session.initiator() == Some(self.uid.as_str()) {
			return self.route_to(Route::Selection, StatusToken::Online).await;
		}

		let now = self.services.clock.now();
		let available = match has_available_matches(self.store(), &self.uid, now, &self.services.policy()).await {
			Ok(available) => available,
			Err(err) => {
				warn!(target: "trade", uid = %self.uid, error = %err, "Candidate check failed, returning to matching");
				true
			}
		};
		if available {
			self.route_to(Route::Matches, StatusToken::Matching).await
		} else {
			self.route_to(Route::Selection, StatusToken::Online).await
		}
	}

	async fn handle_session_update(&self, session: TradeSession) -> Option<Route> {
		self.state().session = Some(session.clone());

		if session.is_canceled {
			return Some(self.route_after_cancellation(&session).await);
		}
		if session.all_confirmed()
			&& !session.is_completed
			&& let Err(err) = self.maybe_finalize().await
		{
			warn!(target: "trade", chat_id = %self.chat_id, error = %err, "Finalization failed");
		}
		if session.is_completed {
			return Some(self.route_after_completion().await);
		}
		None
	}

	async fn cancel(&self) -> ClientResult<Option<Route>> {
		{
			let mut state = self.state();
			if state.handled || state.cancelling {
				return Ok(None);
			}
			state.cancelling = true;
		}
		let result = self.cancel_inner().await;
		self.state().cancelling = false;
		result.map(Some)
	}

	/// Route for a session some other write already closed
	async fn route_for_terminal(&self, session: Option<TradeSession>) -> Route {
		match session {
			Some(session) if session.is_completed => self.route_after_completion().await,
			Some(session) if session.is_canceled => self.route_after_cancellation(&session).await,
			_ => self.route_to(Route::Selection, StatusToken::Online).await,
		}
	}

	async fn cancel_inner(&self) -> ClientResult<Route> {
		let session = match self.fetch_session().await? {
			Some(session) if !session.is_terminal() => session,
			other => return Ok(self.route_for_terminal(other).await),
		};

		let key = chat_key(&self.chat_id);
		let uid = self.uid.clone();
		let write_key = key.clone();
		let decide = move |current: &[Option<barter_store::Document>]| {
			let doc = current.first()?.as_ref()?;
			if codec::decode_session(doc).is_terminal() {
				return None;
			}
			Some(vec![TransactionWrite {
				key: write_key.clone(),
				patch: Patch::new()
					.set("isCanceled", true)
					.set("chatOpened", false)
					.set("canceledBy", uid.as_str())
					.server_timestamp("canceledAt")
					.set("lastMessage", CHAT_CANCELED_MESSAGE)
					.set("lastSenderId", uid.as_str())
					.server_timestamp("updatedAt"),
			}])
		};

		if !self.store().transaction(&[key], &decide).await? {
			debug!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, "Session closed before cancel");
			let current = self.fetch_session().await?;
			return Ok(self.route_for_terminal(current).await);
		}
		append_message(
			self.store(),
			&self.chat_id,
			&self.uid,
			CHAT_CANCELED_MESSAGE,
			MessageKind::System,
		)
		.await?;
		info!(target: "trade", chat_id = %self.chat_id, uid = %self.uid, "Trade canceled");

		let canceled = TradeSession {
			is_canceled: true,
			canceled_by: Some(self.uid.clone()),
			..session
		};
		Ok(self.route_after_cancellation(&canceled).await)
	}
}

/// One user's view of a trade session
///
/// Dropping the room stops its listeners without touching any record.
pub struct TradeRoom {
	shared: Arc<RoomShared>,
	events: mpsc::UnboundedReceiver<RoomEvent>,
}

impl TradeRoom {
	/// Enter the room: switch to trading, make sure the session carries my
	/// nickname, then follow the session, its messages and the partner
	pub async fn open(
		services: &Services,
		presence: Arc<PresenceTracker>,
		uid: &str,
		nickname: &str,
		chat_id: &str,
		partner_id: Option<String>,
	) -> ClientResult<Self> {
		let (sender, events) = mpsc::unbounded_channel();
		let shared = Arc::new(RoomShared {
			services: services.clone(),
			presence,
			uid: uid.to_string(),
			nickname: nickname.to_string(),
			chat_id: chat_id.to_string(),
			state: Mutex::new(RoomState {
				partner_id: partner_id.clone(),
				..RoomState::default()
			}),
			tasks: Mutex::new(Some(Vec::new())),
			events: sender,
		});

		shared
			.presence
			.set_status(uid, StatusToken::Trading, Patch::new())
			.await?;
		ensure_chat_exists(services.store.as_ref(), chat_id, uid, nickname, partner_id.as_deref()).await?;
		if partner_id.is_some() {
			save_last_chat(services.local.as_ref(), chat_id, partner_id.as_deref());
		}

		let room = Self { shared, events };
		room.watch_session()?;
		room.watch_messages()?;
		if let Some(partner_id) = partner_id {
			watch_partner(&room.shared, &partner_id)?;
		}
		info!(target: "trade", chat_id, uid, "Trade room opened");
		Ok(room)
	}

	fn watch_session(&self) -> ClientResult<()> {
		let mut subscription = self.shared.store().watch_document(&chat_key(&self.shared.chat_id))?;
		let shared = self.shared.clone();
		self.shared.adopt(ScheduledTask::spawn("trade-session", async move {
			while let Some(snapshot) = subscription.next().await {
				let Some(doc) = snapshot.document else {
					continue;
				};
				let session = codec::decode_session(&doc);

				let learned_partner = {
					let mut state = shared.state();
					if state.partner_id.is_none() {
						state.partner_id = session.partner_of(&shared.uid).map(str::to_string);
					}
					state.partner_id.clone()
				};
				if let Some(partner_id) = learned_partner
					&& let Err(err) = watch_partner(&shared, &partner_id)
				{
					warn!(target: "trade", %partner_id, error = %err, "Partner presence watch failed");
				}

				shared.emit(RoomEvent::Session(session.clone()));
				shared.handle_session_update(session).await;
			}
		}));
		Ok(())
	}

	fn watch_messages(&self) -> ClientResult<()> {
		let query = Query::collection(messages_collection(&self.shared.chat_id)).order_by("createdAt");
		let mut subscription = self.shared.store().watch_query(&query)?;
		let shared = self.shared.clone();
		self.shared.adopt(ScheduledTask::spawn("trade-messages", async move {
			while let Some(snapshot) = subscription.next().await {
				let messages = snapshot.documents.iter().map(codec::decode_message).collect();
				shared.emit(RoomEvent::Messages(messages));
			}
		}));
		Ok(())
	}

	pub fn uid(&self) -> &str {
		&self.shared.uid
	}

	pub fn chat_id(&self) -> &str {
		&self.shared.chat_id
	}

	pub fn partner_id(&self) -> Option<String> {
		self.shared.state().partner_id.clone()
	}

	/// Last session state seen by this room
	pub fn session(&self) -> Option<TradeSession> {
		self.shared.state().session.clone()
	}

	pub fn routed(&self) -> Option<Route> {
		self.shared.state().routed.clone()
	}

	pub fn is_handled(&self) -> bool {
		self.shared.state().handled
	}

	pub async fn next_event(&mut self) -> Option<RoomEvent> {
		self.events.recv().await
	}

	pub fn try_next_event(&mut self) -> Option<RoomEvent> {
		self.events.try_recv().ok()
	}

	/// Post a text message; blank text and handled rooms are ignored
	pub async fn send_message(&self, text: &str) -> ClientResult<bool> {
		self.shared.send_message(text).await
	}

	/// Flip my confirmation; returns the new state, `None` when the
	/// session is already over
	pub async fn toggle_completion(&self) -> ClientResult<Option<bool>> {
		self.shared.toggle_completion().await
	}

	/// Complete the trade if every participant confirmed
	///
	/// `Ok(false)` when the session is not ready or another client won.
	pub async fn maybe_finalize(&self) -> ClientResult<bool> {
		self.shared.maybe_finalize().await
	}

	/// React to a session snapshot; returns the route if the room was left
	pub async fn handle_session_update(&self, session: TradeSession) -> Option<Route> {
		self.shared.handle_session_update(session).await
	}

	/// Leave the trade; `None` when already handled or in progress
	pub async fn cancel(&self) -> ClientResult<Option<Route>> {
		self.shared.cancel().await
	}

	pub async fn route_after_cancellation(&self, session: &TradeSession) -> Route {
		self.shared.route_after_cancellation(session).await
	}

	/// Stop listening. Idempotent.
	pub fn close(&self) {
		self.shared.stop_tasks();
	}
}

impl Drop for TradeRoom {
	fn drop(&mut self) {
		self.shared.stop_tasks();
	}
}

/// Merge my nickname (and the pair, when known) into the session
pub async fn ensure_chat_exists(
	store: &dyn DocumentStore,
	chat_id: &str,
	uid: &str,
	nickname: &str,
	partner_id: Option<&str>,
) -> ClientResult<()> {
	let mut patch = Patch::new().set(format!("participantNicknames.{}", uid), nickname);
	if let Some(partner_id) = partner_id {
		patch = patch.set("participants", vec![uid, partner_id]);
	}
	store.set(&chat_key(chat_id), patch).await?;
	Ok(())
}

fn watch_partner(shared: &Arc<RoomShared>, partner_id: &str) -> ClientResult<()> {
	{
		let mut state = shared.state();
		if state.partner_watch_started {
			return Ok(());
		}
		state.partner_watch_started = true;
	}

	let mut subscription = shared.store().watch_document(&user_key(partner_id))?;
	let task_shared = shared.clone();
	let notice = shared.services.config.presence_notice_duration();
	shared.adopt(ScheduledTask::spawn("trade-partner", async move {
		let mut tracker = PartnerPresenceTracker::default();
		while let Some(snapshot) = subscription.next().await {
			let Some(doc) = snapshot.document else {
				continue;
			};
			let presence = tracker.observe(codec::decode_presence(&doc) == Presence::Online);
			task_shared.emit(RoomEvent::Partner(presence));
			if presence.came_online {
				let events = task_shared.events.clone();
				task_shared.adopt(ScheduledTask::once("partner-notice", notice, async move {
					let _ = events.send(RoomEvent::PartnerNoticeExpired);
				}));
			}
		}
	}));
	Ok(())
}
