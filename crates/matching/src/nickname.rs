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

use barter_store::KeyValueStore;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::warn;

pub const NICKNAME_KEY: &str = "emblem.nickname";

const ADJECTIVES: [&str; 10] = [
	"Brave", "Swift", "Quiet", "Lucky", "Clever", "Gentle", "Bold", "Bright", "Calm", "Curious",
];

const NOUNS: [&str; 10] = [
	"Hunter", "Falcon", "Badger", "Otter", "Comet", "Ranger", "Fox", "Wanderer", "Pilot", "Seeker",
];

/// `"{adjective} {noun} {100..=999}"`
pub fn compose_nickname<R: Rng + ?Sized>(rng: &mut R) -> String {
	let adjective = ADJECTIVES.choose(rng).copied().unwrap_or(ADJECTIVES[0]);
	let noun = NOUNS.choose(rng).copied().unwrap_or(NOUNS[0]);
	let number: u16 = rng.gen_range(100..=999);
	format!("{} {} {}", adjective, noun, number)
}

/// Cached display name, generated and stored on first use
pub fn get_or_create_nickname(kv: &dyn KeyValueStore) -> String {
	if let Some(existing) = kv.get(NICKNAME_KEY)
		&& !existing.trim().is_empty()
	{
		return existing;
	}

	let nickname = compose_nickname(&mut rand::thread_rng());
	if let Err(err) = kv.set(NICKNAME_KEY, &nickname) {
		warn!(target: "presence", error = %err, "Failed to cache nickname");
	}
	nickname
}
