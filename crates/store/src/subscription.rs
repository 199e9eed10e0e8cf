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

//! Realtime subscription streams
//!
//! A [`Subscription`] yields typed events until it is unsubscribed. The
//! detach callback registered by the store runs exactly once, either on an
//! explicit [`Subscription::unsubscribe`] or when the subscription is dropped.

use tokio::sync::mpsc;

use crate::document::{Document, DocumentKey};

type Detach = Box<dyn FnOnce() + Send>;

/// Push-based event stream with an explicit unsubscribe handle
pub struct Subscription<T> {
	receiver: mpsc::UnboundedReceiver<T>,
	detach: Option<Detach>,
}

impl<T> Subscription<T> {
	pub fn new(receiver: mpsc::UnboundedReceiver<T>, detach: impl FnOnce() + Send + 'static) -> Self {
		Self {
			receiver,
			detach: Some(Box::new(detach)),
		}
	}

	/// Wait for the next event; `None` once unsubscribed or the source is gone
	pub async fn next(&mut self) -> Option<T> {
		if self.detach.is_none() {
			return None;
		}
		self.receiver.recv().await
	}

	/// Next already-delivered event, if any
	pub fn try_next(&mut self) -> Option<T> {
		if self.detach.is_none() {
			return None;
		}
		self.receiver.try_recv().ok()
	}

	pub fn is_active(&self) -> bool {
		self.detach.is_some()
	}

	/// Detach from the source. Idempotent.
	pub fn unsubscribe(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
			self.receiver.close();
		}
	}
}

impl<T> Drop for Subscription<T> {
	fn drop(&mut self) {
		self.unsubscribe();
	}
}

/// State of a single watched document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
	pub key: DocumentKey,
	/// `None` when the document does not exist
	pub document: Option<Document>,
}

impl DocumentSnapshot {
	pub fn exists(&self) -> bool {
		self.document.is_some()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Added,
	Modified,
	Removed,
}

/// One incremental change of a query result set
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
	pub kind: ChangeKind,
	/// New state, or the last known state for removals
	pub document: Document,
}

/// Query result set plus the changes since the previous snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
	pub documents: Vec<Document>,
	pub changes: Vec<DocumentChange>,
	/// First snapshot of the subscription
	pub initial: bool,
}
