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

//! Local walkthrough of one complete trade
//!
//! Two clients share an in-memory document store:
//! - both sign in and start matching with reciprocal selections
//! - the first to see the other requests a trade
//! - the other is routed into the chat by its recovery monitor
//! - both confirm and the session completes
//!
//! Ctrl-C marks both users offline before exiting.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use barter_matching::{
	ChatEntry, Client, ClientConfig, MatchEvent, RoomEvent, Services, TradeRoom, logging,
};
use barter_sdk::{ChatParams, Route, Selection};
use barter_store::MemoryDocumentStore;
use tokio::signal;
use tokio::time::timeout;
use tracing::{info, warn};

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
	// Initialize logging first
	logging::init_logging()?;

	// Load configuration
	let config = ClientConfig::from_env().unwrap_or_else(|_| {
		info!(target: "demo", "Using default configuration");
		ClientConfig::default()
	});

	let store = Arc::new(MemoryDocumentStore::new());
	let alice = Client::new(Services::new(store.clone(), config.clone())?);
	let bob = Client::new(Services::new(store, config)?);

	tokio::select! {
		result = run_trade(&alice, &bob) => {
			result?;
		}
		_ = signal::ctrl_c() => {
			info!(target: "demo", "Interrupted, marking users offline");
			for handle in [alice.handle_exit(), bob.handle_exit()].into_iter().flatten() {
				if let Err(err) = handle.await {
					warn!(target: "demo", error = %err, "Exit write task failed");
				}
			}
			return Ok(());
		}
	}

	alice.shutdown().await;
	bob.shutdown().await;
	info!(target: "demo", "Walkthrough finished");
	Ok(())
}

async fn run_trade(alice: &Client, bob: &Client) -> Result<()> {
	let alice_id = alice.init().await.context("Alice failed to sign in")?;
	let bob_id = bob.init().await.context("Bob failed to sign in")?;
	info!(target: "demo", alice = %alice_id.nickname, bob = %bob_id.nickname, "Both users online");

	let mut alice_matching = alice
		.start_matching(&Selection::new(["fox", "owl"], ["bear"]), false)
		.await?;
	let mut bob_matching = bob
		.start_matching(&Selection::new(["bear"], ["fox"]), false)
		.await?;

	let candidate = timeout(STEP_TIMEOUT, async {
		while let Some(event) = alice_matching.next_event().await {
			if let MatchEvent::Found { candidate, .. } = event {
				return Some(candidate);
			}
		}
		None
	})
	.await
	.context("Timed out waiting for a match")?
	.ok_or_else(|| anyhow!("Matching stopped before a candidate showed up"))?;
	info!(target: "demo", partner = %candidate.nickname, score = candidate.score, "Alice found a match");

	let mut bob_recovery = bob.start_recovery(&Route::Matches).await?;
	let alice_route = alice.request_trade(&candidate).await?;
	alice_matching.stop();

	let bob_route = timeout(STEP_TIMEOUT, bob_recovery.next_event())
		.await
		.context("Timed out waiting for the incoming trade")?
		.ok_or_else(|| anyhow!("Recovery monitor stopped without an event"))?
		.route();
	bob_matching.stop();

	let mut alice_room = enter(alice, &alice_route).await?;
	let mut bob_room = enter(bob, &bob_route).await?;

	alice_room.send_message("Hi! Fox for bear?").await?;
	bob_room.send_message("Deal.").await?;
	alice_room.toggle_completion().await?;
	bob_room.toggle_completion().await?;

	let alice_exit = wait_routed(&mut alice_room).await?;
	let bob_exit = wait_routed(&mut bob_room).await?;
	info!(target: "demo", alice = %alice_exit, bob = %bob_exit, "Trade completed");
	Ok(())
}

async fn enter(client: &Client, route: &Route) -> Result<TradeRoom> {
	let Route::Chat {
		chat_id,
		partner_id,
	} = route
	else {
		return Err(anyhow!("Expected a chat route, got {}", route));
	};
	let params = ChatParams::new(Some(chat_id.clone()), partner_id.clone());
	match client.open_trade_room(&params).await? {
		ChatEntry::Room(room) => Ok(room),
		ChatEntry::Redirect(other) => Err(anyhow!("Chat {} redirected to {}", chat_id, other)),
	}
}

async fn wait_routed(room: &mut TradeRoom) -> Result<Route> {
	if let Some(route) = room.routed() {
		return Ok(route);
	}
	timeout(STEP_TIMEOUT, async {
		while let Some(event) = room.next_event().await {
			match event {
				RoomEvent::Routed(route) => return Some(route),
				RoomEvent::Messages(messages) => {
					if let Some(last) = messages.last() {
						info!(target: "demo", chat_id = %room.chat_id(), sender = %last.sender_id, text = %last.text, "Chat");
					}
				}
				_ => {}
			}
		}
		None
	})
	.await
	.context("Timed out waiting for the trade to finish")?
	.ok_or_else(|| anyhow!("Room closed before routing"))
}
