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

//! Document <-> domain record mapping
//!
//! Records written by older clients carry only a single `status` field. The
//! decoders here derive `{presence, activity}` from it when the split fields
//! are missing, and every presence write mirrors the pair back into `status`.
//! Nothing outside this module reads or writes `status`.

use std::collections::BTreeMap;

use barter_sdk::{
	Activity, ChatMessage, MessageKind, Presence, Selection, TradeSession, UserRecord,
	unique_items,
};
use barter_store::{Document, DocumentKey, Patch};
use serde_json::{Value, json};

pub const USERS: &str = "users";
pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";

pub fn user_key(uid: &str) -> DocumentKey {
	DocumentKey::new(USERS, uid)
}

pub fn chat_key(chat_id: &str) -> DocumentKey {
	DocumentKey::new(CHATS, chat_id)
}

pub fn messages_collection(chat_id: &str) -> String {
	chat_key(chat_id).child_collection(MESSAGES)
}

pub fn decode_presence(doc: &Document) -> Presence {
	if let Some(presence) = doc.str_field("presence").and_then(Presence::parse) {
		return presence;
	}
	match doc.str_field("status") {
		Some("offline") => Presence::Offline,
		_ => Presence::Online,
	}
}

pub fn decode_activity(doc: &Document) -> Activity {
	if let Some(activity) = doc.str_field("activity").and_then(Activity::parse) {
		return activity;
	}
	match doc.str_field("status") {
		Some("matching") => Activity::Matching,
		Some("trading") => Activity::Trading,
		_ => Activity::Idle,
	}
}

/// Single-token status written for older readers
pub fn legacy_status(presence: Presence, activity: Activity) -> &'static str {
	match (presence, activity) {
		(_, Activity::Matching) => "matching",
		(_, Activity::Trading) => "trading",
		(Presence::Offline, Activity::Idle) => "offline",
		(Presence::Online, Activity::Idle) => "online",
	}
}

/// Stored `status`, or the mirror of the decoded pair
pub fn decode_status(doc: &Document) -> String {
	match doc.str_field("status") {
		Some(status) if !status.is_empty() => status.to_string(),
		_ => legacy_status(decode_presence(doc), decode_activity(doc)).to_string(),
	}
}

/// Presence fields plus the legacy mirror and a fresh `lastActive`
pub fn presence_patch(presence: Presence, activity: Activity) -> Patch {
	Patch::new()
		.set("presence", presence.as_str())
		.set("activity", activity.as_str())
		.set("status", legacy_status(presence, activity))
		.server_timestamp("lastActive")
}

pub fn selection_patch(selection: &Selection) -> Patch {
	let selection = selection.normalized();
	Patch::new()
		.set("giveItems", selection.give_items)
		.set("getItems", selection.get_items)
}

pub fn selection_value(selection: &Selection) -> Value {
	let selection = selection.normalized();
	json!({
		"giveItems": selection.give_items,
		"getItems": selection.get_items,
	})
}

pub fn decode_selection_value(value: &Value) -> Selection {
	let list = |key: &str| -> Vec<String> {
		value
			.get(key)
			.and_then(Value::as_array)
			.map(|items| {
				items
					.iter()
					.filter_map(Value::as_str)
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default()
	};
	Selection::new(list("giveItems"), list("getItems"))
}

pub fn decode_user(doc: &Document) -> UserRecord {
	UserRecord {
		uid: doc.id.clone(),
		presence: decode_presence(doc),
		activity: decode_activity(doc),
		give_items: unique_items(doc.string_list("giveItems")),
		get_items: unique_items(doc.string_list("getItems")),
		matching_started_at: doc.timestamp("matchingStartedAt"),
		last_active: doc.timestamp("lastActive"),
		nickname: doc
			.str_field("nickname")
			.filter(|nick| !nick.is_empty())
			.map(str::to_string),
	}
}

fn string_map(doc: &Document, path: &str) -> BTreeMap<String, String> {
	doc.get(path)
		.and_then(Value::as_object)
		.map(|map| {
			map.iter()
				.filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
				.collect()
		})
		.unwrap_or_default()
}

pub fn decode_session(doc: &Document) -> TradeSession {
	let selection_by_user = doc
		.get("selectionByUser")
		.and_then(Value::as_object)
		.map(|map| {
			map.iter()
				.map(|(uid, value)| (uid.clone(), decode_selection_value(value)))
				.collect()
		})
		.unwrap_or_default();

	let completed_by = doc
		.get("completedBy")
		.and_then(Value::as_object)
		.map(|map| {
			map.iter()
				.filter_map(|(uid, value)| value.as_bool().map(|done| (uid.clone(), done)))
				.collect()
		})
		.unwrap_or_default();

	let optional = |path: &str| doc.str_field(path).map(str::to_string);

	TradeSession {
		chat_id: doc.id.clone(),
		participants: doc.string_list("participants"),
		participant_nicknames: string_map(doc, "participantNicknames"),
		selection_by_user,
		initiator_id: optional("initiatorId"),
		chat_opened: doc.bool_field("chatOpened").unwrap_or(false),
		is_completed: doc.bool_field("isCompleted").unwrap_or(false),
		completed_by,
		is_canceled: doc.bool_field("isCanceled").unwrap_or(false),
		canceled_by: optional("canceledBy"),
		canceled_at: doc.timestamp("canceledAt"),
		last_message: optional("lastMessage"),
		last_sender_id: optional("lastSenderId"),
		updated_at: doc.timestamp("updatedAt"),
		completed_at: doc.timestamp("completedAt"),
	}
}

pub fn decode_message(doc: &Document) -> ChatMessage {
	let kind = match doc.str_field("type") {
		Some("system") => MessageKind::System,
		_ => MessageKind::Text,
	};
	ChatMessage {
		id: doc.id.clone(),
		sender_id: doc.str_field("senderId").unwrap_or_default().to_string(),
		text: doc.str_field("text").unwrap_or_default().to_string(),
		kind,
		created_at: doc.timestamp("createdAt"),
	}
}

/// Fields of a newly appended message
pub fn message_patch(sender_id: &str, text: &str, kind: MessageKind) -> Patch {
	Patch::new()
		.set("senderId", sender_id)
		.set("text", text)
		.set("type", kind.as_str())
		.server_timestamp("createdAt")
}
