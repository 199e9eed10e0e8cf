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

//! Barter Matching Client
//!
//! Client-side core of the badge barter service. Every client talks to the
//! shared document store directly; there is no server of our own.
//!
//! Flow:
//! - [`presence`]: anonymous identity, nickname and heartbeat
//! - [`selection`]: the give/get lists a user publishes
//! - [`matcher`]: reciprocal candidate ranking while matching
//! - [`trade`]: the two-party trade session and its chat
//! - [`recovery`]: routing a user back into a chat that is still open
//!
//! [`client::Client`] ties these together the way the pages use them.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod nickname;
pub mod notify;
pub mod presence;
pub mod recovery;
pub mod scheduler;
pub mod selection;
pub mod services;
pub mod trade;

pub use auth::{AuthProvider, AuthUser, LocalAnonymousAuth};
pub use client::{ChatEntry, Client};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use matcher::{MatchEvent, MatchPolicy, MatchingSession, compute_matches};
pub use notify::{LogNotifier, MemoryNotifier, Notification, Notifier, Permission};
pub use presence::{Identity, PresenceTracker};
pub use recovery::{RecoveryEvent, RecoveryMonitor};
pub use services::Services;
pub use trade::{RoomEvent, TradeRoom};
