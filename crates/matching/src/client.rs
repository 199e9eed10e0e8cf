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

//! Page-level flows of one client

use std::sync::{Arc, Mutex, PoisonError};

use barter_sdk::{Activity, ChatParams, ItemMark, MatchCandidate, Route, Selection};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::matcher::{self, MatchingSession};
use crate::notify::ensure_notification_permission;
use crate::presence::{Identity, PresenceTracker};
use crate::recovery::{RecoveryMonitor, poll_interval_for, resolve_chat_context};
use crate::selection::{save_selection_to_storage, selection_from_items};
use crate::services::Services;
use crate::trade::{self, TradeRoom};

/// Session-scoped flag set while a matching session runs
pub const MATCHING_ACTIVE_KEY: &str = "emblem.matching.active";

/// Where the chat page ends up
pub enum ChatEntry {
	Room(TradeRoom),
	/// No chat to show; navigate here instead
	Redirect(Route),
}

pub struct Client {
	services: Services,
	presence: Arc<PresenceTracker>,
	identity: Mutex<Option<Identity>>,
}

impl Client {
	pub fn new(services: Services) -> Self {
		let presence = Arc::new(PresenceTracker::new(
			services.store.clone(),
			services.auth.clone(),
			services.local.clone(),
			&services.config,
		));
		Self {
			services,
			presence,
			identity: Mutex::new(None),
		}
	}

	pub fn services(&self) -> &Services {
		&self.services
	}

	pub fn presence(&self) -> &Arc<PresenceTracker> {
		&self.presence
	}

	pub fn identity(&self) -> Option<Identity> {
		self.identity
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	fn require_identity(&self) -> ClientResult<Identity> {
		self.identity().ok_or(ClientError::NotSignedIn)
	}

	/// Notification permission, sign-in and presence
	pub async fn init(&self) -> ClientResult<Identity> {
		let result = match ensure_notification_permission(self.services.notifier.as_ref()).await {
			Ok(()) => self.presence.init_anonymous_auth().await,
			Err(err) => Err(err),
		};

		match result {
			Ok(identity) => {
				*self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
				info!(target: "client", uid = %identity.uid, "Client initialized");
				Ok(identity)
			}
			Err(err) => {
				error!(target: "client", code = err.code(), hint = %err.hint(), "Client initialization failed");
				Err(err)
			}
		}
	}

	/// Reloading while matching picks the session up again
	pub fn should_resume_matching(&self, identity: &Identity) -> bool {
		identity.activity == Activity::Matching
			|| self.services.session.get(MATCHING_ACTIVE_KEY).as_deref() == Some("1")
	}

	fn set_matching_flag(&self, active: bool) {
		let value = if active { "1" } else { "0" };
		if let Err(err) = self.services.session.set(MATCHING_ACTIVE_KEY, value) {
			warn!(target: "client", error = %err, "Failed to store matching flag");
		}
	}

	/// Turn item marks into a selection and start matching with it
	pub async fn start_matching_flow(&self, items: &[ItemMark], resume: bool) -> ClientResult<MatchingSession> {
		let selection = selection_from_items(items);
		self.start_matching(&selection, resume).await
	}

	pub async fn start_matching(&self, selection: &Selection, resume: bool) -> ClientResult<MatchingSession> {
		let identity = self.require_identity()?;
		if !selection.is_valid() {
			return Err(ClientError::InvalidSelection);
		}
		save_selection_to_storage(self.services.local.as_ref(), selection)?;

		let session = MatchingSession::start(&self.services, &identity.uid, selection, resume).await?;
		self.set_matching_flag(true);
		Ok(session)
	}

	/// Leave matching, through the running session when there is one
	pub async fn cancel_matching_flow(&self, session: Option<&mut MatchingSession>) -> ClientResult<()> {
		let identity = self.require_identity()?;
		match session {
			Some(session) => session.cancel().await?,
			None => matcher::cancel_matching(self.services.store.as_ref(), &identity.uid).await?,
		}
		self.set_matching_flag(false);
		Ok(())
	}

	pub async fn request_trade(&self, candidate: &MatchCandidate) -> ClientResult<Route> {
		let identity = self.require_identity()?;
		let route = trade::request_trade(
			&self.services,
			&self.presence,
			&identity.uid,
			&identity.nickname,
			candidate,
		)
		.await?;
		self.set_matching_flag(false);
		Ok(route)
	}

	/// Resolve the chat to show and enter it
	pub async fn open_trade_room(&self, params: &ChatParams) -> ClientResult<ChatEntry> {
		let identity = self.require_identity()?;
		let route = resolve_chat_context(
			self.services.store.as_ref(),
			self.services.local.as_ref(),
			&identity.uid,
			params,
		)
		.await?;

		let (chat_id, partner_id) = match route {
			Route::Chat {
				chat_id,
				partner_id,
			} => (chat_id, partner_id),
			other => return Ok(ChatEntry::Redirect(other)),
		};

		let room = TradeRoom::open(
			&self.services,
			self.presence.clone(),
			&identity.uid,
			&identity.nickname,
			&chat_id,
			partner_id,
		)
		.await?;
		Ok(ChatEntry::Room(room))
	}

	/// Watch for an open chat while on `page`
	pub async fn start_recovery(&self, page: &Route) -> ClientResult<RecoveryMonitor> {
		let identity = self.require_identity()?;
		let interval = poll_interval_for(page, &self.services.config);
		RecoveryMonitor::start(&self.services, &identity.uid, interval).await
	}

	pub fn handle_exit(&self) -> Option<JoinHandle<()>> {
		self.presence.handle_exit()
	}

	pub async fn shutdown(&self) {
		self.presence.stop_presence().await;
		info!(target: "client", "Client shut down");
	}
}
