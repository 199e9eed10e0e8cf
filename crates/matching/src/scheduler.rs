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

//! Cancellable periodic and one-shot background tasks

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Background task that stops when cancelled or dropped
#[derive(Debug)]
pub struct ScheduledTask {
	name: &'static str,
	handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
	/// Run `tick` every `period`, first after one full period
	///
	/// The task ends on its own when `tick` returns `ControlFlow::Break`.
	pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
	where
		F: FnMut() -> Fut + Send + 'static,
		Fut: Future<Output = ControlFlow<()>> + Send + 'static,
	{
		let handle = tokio::spawn(async move {
			let mut interval = time::interval_at(Instant::now() + period, period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				interval.tick().await;
				if tick().await.is_break() {
					debug!(target: "client", task = name, "Scheduled task finished");
					break;
				}
			}
		});
		Self {
			name,
			handle: Some(handle),
		}
	}

	/// Run `task` in the background until it finishes or is cancelled
	pub fn spawn<Fut>(name: &'static str, task: Fut) -> Self
	where
		Fut: Future<Output = ()> + Send + 'static,
	{
		Self {
			name,
			handle: Some(tokio::spawn(task)),
		}
	}

	/// Run `task` once after `delay`
	pub fn once<Fut>(name: &'static str, delay: Duration, task: Fut) -> Self
	where
		Fut: Future<Output = ()> + Send + 'static,
	{
		let handle = tokio::spawn(async move {
			time::sleep(delay).await;
			task.await;
		});
		Self {
			name,
			handle: Some(handle),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn is_active(&self) -> bool {
		self.handle
			.as_ref()
			.is_some_and(|handle| !handle.is_finished())
	}

	/// Stop the task. Idempotent.
	pub fn cancel(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
			debug!(target: "client", task = self.name, "Scheduled task cancelled");
		}
	}
}

impl Drop for ScheduledTask {
	fn drop(&mut self) {
		self.cancel();
	}
}
