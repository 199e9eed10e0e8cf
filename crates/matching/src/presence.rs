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

//! Identity, presence and heartbeat
//!
//! A [`PresenceTracker`] owns one signed-in identity: it upserts the user
//! record on sign-in, refreshes `lastActive` on a fixed interval and writes
//! `presence = offline` on exit or stop. Background writes never fail the
//! caller; they are logged at `warn` and dropped.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use barter_sdk::{Activity, Presence, StatusToken};
use barter_store::{DocumentStore, KeyValueStore, Patch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::codec::{self, user_key};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::nickname::get_or_create_nickname;
use crate::scheduler::ScheduledTask;

/// Signed-in user as seen right after sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
	pub uid: String,
	pub nickname: String,
	pub presence: Presence,
	pub activity: Activity,
}

#[derive(Default)]
struct TrackerState {
	uid: Option<String>,
	/// Last activity this tracker wrote or observed
	last_activity: Activity,
	heartbeat: Option<ScheduledTask>,
	exit_armed: bool,
}

pub struct PresenceTracker {
	store: Arc<dyn DocumentStore>,
	auth: Arc<dyn AuthProvider>,
	local: Arc<dyn KeyValueStore>,
	heartbeat_interval: Duration,
	state: Mutex<TrackerState>,
}

impl PresenceTracker {
	pub fn new(
		store: Arc<dyn DocumentStore>,
		auth: Arc<dyn AuthProvider>,
		local: Arc<dyn KeyValueStore>,
		config: &ClientConfig,
	) -> Self {
		Self {
			store,
			auth,
			local,
			heartbeat_interval: config.heartbeat_interval(),
			state: Mutex::new(TrackerState::default()),
		}
	}

	fn state(&self) -> MutexGuard<'_, TrackerState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn current_uid(&self) -> Option<String> {
		self.state().uid.clone()
	}

	pub fn is_heartbeat_running(&self) -> bool {
		self.state()
			.heartbeat
			.as_ref()
			.is_some_and(ScheduledTask::is_active)
	}

	/// Sign in and mark the user online
	///
	/// The stored activity is kept, so a user who reloads while matching
	/// stays matching. A record created here starts with empty selections.
	pub async fn init_anonymous_auth(&self) -> ClientResult<Identity> {
		let user = self.auth.sign_in_anonymously().await?;
		let nickname = get_or_create_nickname(self.local.as_ref());
		let key = user_key(&user.uid);

		let existing = self.store.get(&key).await?;
		let activity = existing
			.as_ref()
			.map(codec::decode_activity)
			.unwrap_or_default();

		let mut patch = codec::presence_patch(Presence::Online, activity).set("nickname", nickname.as_str());
		if existing.is_none() {
			patch = patch
				.set("giveItems", Vec::<String>::new())
				.set("getItems", Vec::<String>::new());
		}
		self.store.set(&key, patch).await?;

		{
			let mut state = self.state();
			if let Some(mut heartbeat) = state.heartbeat.take() {
				heartbeat.cancel();
			}
			state.uid = Some(user.uid.clone());
			state.last_activity = activity;
			state.heartbeat = Some(self.spawn_heartbeat(&user.uid));
			state.exit_armed = true;
		}

		info!(
			target: "presence",
			uid = %user.uid,
			nickname = %nickname,
			activity = %activity,
			"Signed in"
		);

		Ok(Identity {
			uid: user.uid,
			nickname,
			presence: Presence::Online,
			activity,
		})
	}

	fn spawn_heartbeat(&self, uid: &str) -> ScheduledTask {
		let store = self.store.clone();
		let key = user_key(uid);
		ScheduledTask::every("heartbeat", self.heartbeat_interval, move || {
			let store = store.clone();
			let key = key.clone();
			async move {
				match store.set(&key, Patch::new().server_timestamp("lastActive")).await {
					Ok(()) => debug!(target: "presence", key = %key, "Heartbeat"),
					Err(err) => warn!(target: "presence", key = %key, error = %err, "Heartbeat failed"),
				}
				ControlFlow::Continue(())
			}
		})
	}

	/// Write a status token (`matching`, `trading`, `online`, `offline`)
	///
	/// `extra` fields are merged into the same write.
	pub async fn set_user_status(&self, uid: &str, status: &str, extra: Patch) -> ClientResult<()> {
		let token: StatusToken = status.parse()?;
		self.set_status(uid, token, extra).await
	}

	pub async fn set_status(&self, uid: &str, token: StatusToken, extra: Patch) -> ClientResult<()> {
		let (presence, activity) = match token {
			StatusToken::Matching => (Presence::Online, Activity::Matching),
			StatusToken::Trading => (Presence::Online, Activity::Trading),
			StatusToken::Online => (Presence::Online, Activity::Idle),
			StatusToken::Offline => (Presence::Offline, self.current_activity(uid).await),
		};

		let patch = codec::presence_patch(presence, activity).extend(extra);
		self.store.set(&user_key(uid), patch).await?;

		{
			let mut state = self.state();
			if state.uid.as_deref() == Some(uid) {
				state.last_activity = activity;
			}
		}
		info!(
			target: "presence",
			uid,
			presence = presence.as_str(),
			activity = %activity,
			"Status updated"
		);
		Ok(())
	}

	/// Stored activity, else the last one this tracker knows of
	async fn current_activity(&self, uid: &str) -> Activity {
		match self.store.get(&user_key(uid)).await {
			Ok(Some(doc)) => codec::decode_activity(&doc),
			Ok(None) => self.state().last_activity,
			Err(err) => {
				warn!(target: "presence", uid, error = %err, "Could not read activity, using last known");
				self.state().last_activity
			}
		}
	}

	/// Best-effort offline write on process or page exit
	///
	/// Runs on a detached task; the handle is returned for callers that
	/// want to wait for it. `None` when no identity is armed or no runtime
	/// is available.
	pub fn handle_exit(&self) -> Option<JoinHandle<()>> {
		let (uid, activity) = {
			let state = self.state();
			if !state.exit_armed {
				return None;
			}
			(state.uid.clone()?, state.last_activity)
		};

		let runtime = match tokio::runtime::Handle::try_current() {
			Ok(runtime) => runtime,
			Err(_) => {
				warn!(target: "presence", %uid, "No runtime for exit write");
				return None;
			}
		};

		let store = self.store.clone();
		Some(runtime.spawn(async move {
			let patch = Patch::new()
				.set("presence", Presence::Offline.as_str())
				.set("status", codec::legacy_status(Presence::Offline, activity))
				.server_timestamp("lastActive");
			if let Err(err) = store.set(&user_key(&uid), patch).await {
				warn!(target: "presence", %uid, error = %err, "Exit write failed");
			} else {
				info!(target: "presence", %uid, "Marked offline on exit");
			}
		}))
	}

	/// Stop the heartbeat, write offline and disarm the exit hook
	///
	/// No-op without an active identity.
	pub async fn stop_presence(&self) {
		let (uid, heartbeat) = {
			let mut state = self.state();
			let Some(uid) = state.uid.take() else {
				return;
			};
			state.exit_armed = false;
			(uid, state.heartbeat.take())
		};
		if let Some(mut heartbeat) = heartbeat {
			heartbeat.cancel();
		}

		if let Err(err) = self.set_status(&uid, StatusToken::Offline, Patch::new()).await {
			warn!(target: "presence", %uid, error = %err, "Offline write failed");
		}
		info!(target: "presence", %uid, "Presence stopped");
	}
}
