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

//! Page-level routing surface
//!
//! Navigation between the four screens is carried purely by URL and the
//! `chatId` / `partnerId` query parameters.

use std::fmt;

use url::form_urlencoded;

pub const SELECTION_PAGE: &str = "index.html";
pub const MATCHES_PAGE: &str = "exchange.html";
pub const CHAT_PAGE: &str = "chat.html";
pub const SUPPORT_PAGE: &str = "support.html";

/// A navigation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
	/// Badge selection (home)
	Selection,
	/// Match browsing
	Matches,
	/// Negotiation chat
	Chat {
		chat_id: String,
		partner_id: Option<String>,
	},
	Support,
}

impl Route {
	pub fn chat(chat_id: impl Into<String>, partner_id: Option<String>) -> Self {
		Route::Chat {
			chat_id: chat_id.into(),
			partner_id,
		}
	}

	pub fn to_url(&self) -> String {
		match self {
			Route::Selection => SELECTION_PAGE.to_string(),
			Route::Matches => MATCHES_PAGE.to_string(),
			Route::Support => SUPPORT_PAGE.to_string(),
			Route::Chat {
				chat_id,
				partner_id,
			} => {
				let mut query = form_urlencoded::Serializer::new(String::new());
				query.append_pair("chatId", chat_id);
				if let Some(partner_id) = partner_id {
					query.append_pair("partnerId", partner_id);
				}
				format!("{CHAT_PAGE}?{}", query.finish())
			}
		}
	}

	/// Parse a relative page URL produced by [`Route::to_url`]
	///
	/// A chat URL without `chatId` is not routable and yields `None`.
	pub fn parse(url: &str) -> Option<Self> {
		let (page, query) = url.split_once('?').unwrap_or((url, ""));
		let page = page.rsplit('/').next().unwrap_or(page);
		match page {
			"" | SELECTION_PAGE => Some(Route::Selection),
			MATCHES_PAGE => Some(Route::Matches),
			SUPPORT_PAGE => Some(Route::Support),
			CHAT_PAGE => {
				let params = ChatParams::from_query(query);
				params.chat_id.map(|chat_id| Route::Chat {
					chat_id,
					partner_id: params.partner_id,
				})
			}
			_ => None,
		}
	}
}

impl fmt::Display for Route {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_url())
	}
}

/// Query parameters of the chat page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatParams {
	pub chat_id: Option<String>,
	pub partner_id: Option<String>,
}

impl ChatParams {
	pub fn new(chat_id: Option<String>, partner_id: Option<String>) -> Self {
		Self {
			chat_id: chat_id.filter(|id| !id.is_empty()),
			partner_id: partner_id.filter(|id| !id.is_empty()),
		}
	}

	pub fn from_query(query: &str) -> Self {
		let query = query.strip_prefix('?').unwrap_or(query);
		let mut params = ChatParams::default();
		for (key, value) in form_urlencoded::parse(query.as_bytes()) {
			if value.is_empty() {
				continue;
			}
			match key.as_ref() {
				"chatId" => params.chat_id = Some(value.into_owned()),
				"partnerId" => params.partner_id = Some(value.into_owned()),
				_ => {}
			}
		}
		params
	}
}
