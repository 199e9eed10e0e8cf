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

//! System notifications
//!
//! Notification permission is a hard precondition of client start-up; after
//! that, notifications are best-effort and never fail a flow.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use barter_sdk::Route;
use tracing::{info, warn};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
	Granted,
	Denied,
	/// Not asked yet
	Default,
	Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
	pub body: String,
	/// Notifications sharing a tag replace each other
	pub tag: Option<String>,
	/// Page opened when the notification is clicked
	pub url: Option<String>,
}

impl Notification {
	pub fn new(body: impl Into<String>) -> Self {
		Self {
			body: body.into(),
			tag: None,
			url: None,
		}
	}

	pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
		self.tag = Some(tag.into());
		self
	}

	pub fn with_route(mut self, route: &Route) -> Self {
		self.url = Some(route.to_url());
		self
	}
}

#[async_trait]
pub trait Notifier: Send + Sync {
	fn permission(&self) -> Permission;

	/// Ask the user; returns the resulting permission
	async fn request_permission(&self) -> Permission;

	fn show(&self, title: &str, notification: &Notification) -> ClientResult<()>;
}

/// Make sure notifications can be shown, asking when not decided yet
pub async fn ensure_notification_permission(notifier: &dyn Notifier) -> ClientResult<()> {
	let permission = match notifier.permission() {
		Permission::Default => notifier.request_permission().await,
		other => other,
	};
	match permission {
		Permission::Granted => Ok(()),
		Permission::Unsupported => Err(ClientError::NotificationsUnsupported),
		Permission::Denied | Permission::Default => Err(ClientError::NotificationPermissionDenied),
	}
}

/// Show a notification if permitted; returns whether it was shown
///
/// `url` falls back to `current` when the notification carries none.
pub fn show_system_notification(
	notifier: &dyn Notifier,
	title: &str,
	notification: Notification,
	current: &Route,
) -> bool {
	if notifier.permission() != Permission::Granted {
		return false;
	}
	let notification = Notification {
		url: notification.url.or_else(|| Some(current.to_url())),
		..notification
	};
	match notifier.show(title, &notification) {
		Ok(()) => true,
		Err(err) => {
			warn!(target: "notify", error = %err, title, "Failed to show notification");
			false
		}
	}
}

/// Records notifications instead of showing them
pub struct MemoryNotifier {
	permission: Mutex<Permission>,
	answer: Permission,
	shown: Mutex<Vec<(String, Notification)>>,
}

impl MemoryNotifier {
	/// Already granted
	pub fn granted() -> Self {
		Self::with_permission(Permission::Granted, Permission::Granted)
	}

	/// Starts at `permission`; a request resolves to `answer`
	pub fn with_permission(permission: Permission, answer: Permission) -> Self {
		Self {
			permission: Mutex::new(permission),
			answer,
			shown: Mutex::new(Vec::new()),
		}
	}

	pub fn shown(&self) -> Vec<(String, Notification)> {
		self.shown
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}
}

impl Default for MemoryNotifier {
	fn default() -> Self {
		Self::granted()
	}
}

#[async_trait]
impl Notifier for MemoryNotifier {
	fn permission(&self) -> Permission {
		*self.permission.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn request_permission(&self) -> Permission {
		let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
		if *permission == Permission::Default {
			*permission = self.answer;
		}
		*permission
	}

	fn show(&self, title: &str, notification: &Notification) -> ClientResult<()> {
		let mut shown = self.shown.lock().unwrap_or_else(PoisonError::into_inner);
		// Same tag replaces the earlier entry
		if let Some(tag) = &notification.tag {
			shown.retain(|(_, existing)| existing.tag.as_ref() != Some(tag));
		}
		shown.push((title.to_string(), notification.clone()));
		Ok(())
	}
}

/// Writes notifications to the log; always permitted
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
	fn permission(&self) -> Permission {
		Permission::Granted
	}

	async fn request_permission(&self) -> Permission {
		Permission::Granted
	}

	fn show(&self, title: &str, notification: &Notification) -> ClientResult<()> {
		info!(
			target: "notify",
			title,
			body = %notification.body,
			tag = notification.tag.as_deref().unwrap_or("-"),
			url = notification.url.as_deref().unwrap_or("-"),
			"Notification"
		);
		Ok(())
	}
}
