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

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// System message written when a trade session opens
pub const CHAT_OPENED_MESSAGE: &str = "Chat room opened.";
/// Announcement used by older clients to open a session
pub const LEGACY_MATCH_REQUEST_MESSAGE: &str = "A trade request has arrived";
/// System message written when a participant closes the session
pub const CHAT_CANCELED_MESSAGE: &str = "The chat was closed and the trade was canceled.";
/// System message written by the participant whose finalization committed
pub const TRADE_COMPLETED_MESSAGE: &str = "The trade is complete. You may leave now.";

/// Online/offline liveness flag of an identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
	#[default]
	Online,
	Offline,
}

impl Presence {
	pub fn as_str(&self) -> &'static str {
		match self {
			Presence::Online => "online",
			Presence::Offline => "offline",
		}
	}

	/// Strict parse of the canonical field value
	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"online" => Some(Presence::Online),
			"offline" => Some(Presence::Offline),
			_ => None,
		}
	}
}

/// What a user is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
	#[default]
	Idle,
	Matching,
	Trading,
}

impl Activity {
	pub fn as_str(&self) -> &'static str {
		match self {
			Activity::Idle => "idle",
			Activity::Matching => "matching",
			Activity::Trading => "trading",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"idle" => Some(Activity::Idle),
			"matching" => Some(Activity::Matching),
			"trading" => Some(Activity::Trading),
			_ => None,
		}
	}
}

impl fmt::Display for Activity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Status tokens accepted by presence updates
///
/// `Online` means "online and idle". `Offline` keeps whatever activity the
/// record currently carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusToken {
	Online,
	Offline,
	Matching,
	Trading,
}

impl StatusToken {
	pub fn as_str(&self) -> &'static str {
		match self {
			StatusToken::Online => "online",
			StatusToken::Offline => "offline",
			StatusToken::Matching => "matching",
			StatusToken::Trading => "trading",
		}
	}
}

impl fmt::Display for StatusToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown status token: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for StatusToken {
	type Err = ParseStatusError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"online" | "idle" => Ok(StatusToken::Online),
			"offline" => Ok(StatusToken::Offline),
			"matching" => Ok(StatusToken::Matching),
			"trading" => Ok(StatusToken::Trading),
			other => Err(ParseStatusError(other.to_string())),
		}
	}
}

/// Deduplicate item ids, keeping the first occurrence of each
pub fn unique_items<I, S>(items: I) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();
	for item in items {
		let item = item.into();
		if seen.insert(item.clone()) {
			out.push(item);
		}
	}
	out
}

/// Items present in both lists, in `left` order
pub fn intersect(left: &[String], right: &[String]) -> Vec<String> {
	let right: HashSet<&str> = right.iter().map(String::as_str).collect();
	unique_items(left.iter().filter(|item| right.contains(item.as_str())).cloned())
}

/// Canonical give/get set pair of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
	/// Items the user has duplicates of and offers
	#[serde(default)]
	pub give_items: Vec<String>,
	/// Items the user wants
	#[serde(default)]
	pub get_items: Vec<String>,
}

impl Selection {
	pub fn new<G, R, S>(give_items: G, get_items: R) -> Self
	where
		G: IntoIterator<Item = S>,
		R: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			give_items: unique_items(give_items),
			get_items: unique_items(get_items),
		}
	}

	/// Both sides non-empty; the gate for entering matching
	pub fn is_valid(&self) -> bool {
		!self.give_items.is_empty() && !self.get_items.is_empty()
	}

	pub fn normalized(&self) -> Self {
		Self::new(self.give_items.iter().cloned(), self.get_items.iter().cloned())
	}
}

/// Per-item mark made on the selection screen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkStatus {
	/// Offered (give)
	Sell,
	/// Wanted (get)
	Buy,
	#[default]
	Center,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMark {
	pub id: String,
	#[serde(default)]
	pub status: MarkStatus,
}

impl ItemMark {
	pub fn new(id: impl Into<String>, status: MarkStatus) -> Self {
		Self {
			id: id.into(),
			status,
		}
	}
}

/// Decoded `users/{uid}` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
	pub uid: String,
	pub presence: Presence,
	pub activity: Activity,
	pub give_items: Vec<String>,
	pub get_items: Vec<String>,
	/// Present only while matching
	pub matching_started_at: Option<DateTime<Utc>>,
	/// Refreshed by the heartbeat
	pub last_active: Option<DateTime<Utc>>,
	pub nickname: Option<String>,
}

impl UserRecord {
	pub fn selection(&self) -> Selection {
		Selection::new(self.give_items.iter().cloned(), self.get_items.iter().cloned())
	}
}

/// Lifecycle state of a trade session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Document exists but was never opened by a trade request
	Pending,
	Open,
	Completed,
	Canceled,
}

/// Decoded `chats/{chatId}` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeSession {
	pub chat_id: String,
	pub participants: Vec<String>,
	pub participant_nicknames: BTreeMap<String, String>,
	/// Give/get snapshot captured when the session was created
	pub selection_by_user: BTreeMap<String, Selection>,
	pub initiator_id: Option<String>,
	pub chat_opened: bool,
	pub is_completed: bool,
	pub completed_by: BTreeMap<String, bool>,
	pub is_canceled: bool,
	pub canceled_by: Option<String>,
	pub canceled_at: Option<DateTime<Utc>>,
	pub last_message: Option<String>,
	pub last_sender_id: Option<String>,
	pub updated_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
}

impl TradeSession {
	pub fn is_terminal(&self) -> bool {
		self.is_completed || self.is_canceled
	}

	pub fn state(&self) -> SessionState {
		if self.is_completed {
			SessionState::Completed
		} else if self.is_canceled {
			SessionState::Canceled
		} else if self.chat_opened {
			SessionState::Open
		} else {
			SessionState::Pending
		}
	}

	/// Participant ids that are non-empty strings
	pub fn valid_participants(&self) -> impl Iterator<Item = &str> {
		self.participants
			.iter()
			.map(String::as_str)
			.filter(|id| !id.is_empty())
	}

	pub fn partner_of(&self, uid: &str) -> Option<&str> {
		self.participants
			.iter()
			.map(String::as_str)
			.find(|id| *id != uid)
	}

	pub fn has_confirmed(&self, uid: &str) -> bool {
		self.completed_by.get(uid).copied().unwrap_or(false)
	}

	/// At least two participants and every one of them confirmed
	pub fn all_confirmed(&self) -> bool {
		let participants: Vec<&str> = self.valid_participants().collect();
		participants.len() >= 2 && participants.iter().all(|id| self.has_confirmed(id))
	}

	/// `initiatorId`, or the sender of the opening announcement on older records
	pub fn initiator(&self) -> Option<&str> {
		if let Some(id) = self.initiator_id.as_deref()
			&& !id.is_empty()
		{
			return Some(id);
		}
		match (self.last_sender_id.as_deref(), self.last_message.as_deref()) {
			(Some(sender), Some(message)) if message.contains(CHAT_OPENED_MESSAGE) => Some(sender),
			_ => None,
		}
	}

	pub fn selection_for(&self, uid: &str) -> Selection {
		self.selection_by_user.get(uid).cloned().unwrap_or_default()
	}

	pub fn nickname_of(&self, uid: &str) -> Option<&str> {
		self.participant_nicknames.get(uid).map(String::as_str)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
	#[default]
	Text,
	System,
}

impl MessageKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			MessageKind::Text => "text",
			MessageKind::System => "system",
		}
	}
}

/// Entry of `chats/{chatId}/messages`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
	pub id: String,
	pub sender_id: String,
	pub text: String,
	pub kind: MessageKind,
	pub created_at: Option<DateTime<Utc>>,
}

/// A ranked trading partner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
	pub uid: String,
	pub nickname: String,
	/// What I would receive: their give ∩ my get
	pub get_items: Vec<String>,
	/// What I would hand over: their get ∩ my give
	pub give_items: Vec<String>,
	pub score: usize,
	pub matching_started_at: Option<DateTime<Utc>>,
	pub last_active: Option<DateTime<Utc>>,
}

/// Deterministic session id for a pair of identities
pub fn build_chat_id(uid_a: &str, uid_b: &str) -> String {
	let mut pair = [uid_a, uid_b];
	pair.sort_unstable();
	pair.join("_")
}
