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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::document::{Document, DocumentKey, Fields, Patch, WriteMode};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::store::{DocumentStore, TransactionFn};
use crate::subscription::{
	ChangeKind, DocumentChange, DocumentSnapshot, QuerySnapshot, Subscription,
};

struct StoredDocument {
	/// Insertion sequence, the tie-breaker for result ordering
	seq: u64,
	fields: Fields,
}

type Collections = HashMap<String, BTreeMap<String, StoredDocument>>;

enum WatchTarget {
	Document {
		key: DocumentKey,
		sender: mpsc::UnboundedSender<DocumentSnapshot>,
	},
	Query {
		query: Query,
		last: HashMap<String, Fields>,
		sender: mpsc::UnboundedSender<QuerySnapshot>,
	},
}

struct Watcher {
	id: u64,
	target: WatchTarget,
}

struct Inner {
	collections: Collections,
	next_seq: u64,
	next_watcher_id: u64,
	watchers: Vec<Watcher>,
	available: bool,
}

impl Inner {
	fn new() -> Self {
		Self {
			collections: HashMap::new(),
			next_seq: 0,
			next_watcher_id: 0,
			watchers: Vec::new(),
			available: true,
		}
	}

	fn ensure_available(&self) -> StoreResult<()> {
		if self.available {
			Ok(())
		} else {
			Err(StoreError::Unavailable("memory store is offline".into()))
		}
	}

	fn store(&mut self, key: &DocumentKey, fields: Fields) {
		let seq = self.next_seq;
		let collection = self
			.collections
			.entry(key.collection().to_string())
			.or_default();
		match collection.get_mut(key.id()) {
			Some(existing) => existing.fields = fields,
			None => {
				self.next_seq += 1;
				collection.insert(key.id().to_string(), StoredDocument { seq, fields });
			}
		}
	}

	fn write(
		&mut self,
		key: &DocumentKey,
		patch: &Patch,
		mode: WriteMode,
		now_millis: i64,
		require_existing: bool,
	) -> StoreResult<()> {
		let mut fields = match read(&self.collections, key) {
			Some(document) => document.fields,
			None if require_existing => return Err(StoreError::NotFound(key.to_string())),
			None => Fields::new(),
		};
		patch.apply(&mut fields, mode, now_millis)?;
		self.store(key, fields);
		self.notify(std::slice::from_ref(key));
		Ok(())
	}

	fn register(&mut self, target: WatchTarget) -> u64 {
		let id = self.next_watcher_id;
		self.next_watcher_id += 1;
		self.watchers.push(Watcher { id, target });
		id
	}

	/// Push new state to every watcher affected by `touched`
	fn notify(&mut self, touched: &[DocumentKey]) {
		let Inner {
			collections,
			watchers,
			..
		} = self;
		let mut closed = Vec::new();

		for watcher in watchers.iter_mut() {
			let delivered = match &mut watcher.target {
				WatchTarget::Document { key, sender } => {
					if !touched.contains(key) {
						continue;
					}
					sender
						.send(DocumentSnapshot {
							key: key.clone(),
							document: read(collections, key),
						})
						.is_ok()
				}
				WatchTarget::Query {
					query,
					last,
					sender,
				} => {
					if !touched
						.iter()
						.any(|key| key.collection() == query.collection_path())
					{
						continue;
					}
					let documents = run_query(collections, query);
					let changes = diff(last, &documents);
					if changes.is_empty() {
						continue;
					}
					*last = index(&documents);
					sender
						.send(QuerySnapshot {
							documents,
							changes,
							initial: false,
						})
						.is_ok()
				}
			};
			if !delivered {
				closed.push(watcher.id);
			}
		}

		if !closed.is_empty() {
			debug!(target: "store", count = closed.len(), "Dropping closed watchers");
			watchers.retain(|watcher| !closed.contains(&watcher.id));
		}
	}
}

fn read(collections: &Collections, key: &DocumentKey) -> Option<Document> {
	collections
		.get(key.collection())
		.and_then(|docs| docs.get(key.id()))
		.map(|stored| Document::new(key.id(), stored.fields.clone()))
}

fn run_query(collections: &Collections, query: &Query) -> Vec<Document> {
	let Some(docs) = collections.get(query.collection_path()) else {
		return Vec::new();
	};
	let mut matched: Vec<(u64, Document)> = docs
		.iter()
		.map(|(id, stored)| (stored.seq, Document::new(id.clone(), stored.fields.clone())))
		.filter(|(_, document)| query.matches(document))
		.collect();
	matched.sort_by(|(seq_a, a), (seq_b, b)| query.compare(a, b).then(seq_a.cmp(seq_b)));
	matched.into_iter().map(|(_, document)| document).collect()
}

fn index(documents: &[Document]) -> HashMap<String, Fields> {
	documents
		.iter()
		.map(|document| (document.id.clone(), document.fields.clone()))
		.collect()
}

fn diff(previous: &HashMap<String, Fields>, current: &[Document]) -> Vec<DocumentChange> {
	let mut changes = Vec::new();
	for document in current {
		let kind = match previous.get(&document.id) {
			None => ChangeKind::Added,
			Some(fields) if *fields != document.fields => ChangeKind::Modified,
			Some(_) => continue,
		};
		changes.push(DocumentChange {
			kind,
			document: document.clone(),
		});
	}
	for (id, fields) in previous {
		if !current.iter().any(|document| &document.id == id) {
			changes.push(DocumentChange {
				kind: ChangeKind::Removed,
				document: Document::new(id.clone(), fields.clone()),
			});
		}
	}
	changes
}

/// In-memory document store
///
/// Clones share the same backing data, so several clients in one process see
/// each other's writes and subscription pushes, like browsers attached to one
/// hosted database.
///
/// Characteristics:
/// - A single mutex serializes writes, so transactions are trivially atomic
/// - Server timestamps come from the injected [`Clock`]
/// - Query results are ordered by the `order_by` field, then insertion order
/// - `set_available(false)` makes every call fail like a dropped connection
#[derive(Clone)]
pub struct MemoryDocumentStore {
	inner: Arc<Mutex<Inner>>,
	clock: Arc<dyn Clock>,
}

impl MemoryDocumentStore {
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock))
	}

	pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::new())),
			clock,
		}
	}

	/// Simulate losing or regaining the connection
	pub fn set_available(&self, available: bool) {
		self.lock().available = available;
	}

	pub fn document_count(&self, collection: &str) -> usize {
		self.lock()
			.collections
			.get(collection)
			.map(BTreeMap::len)
			.unwrap_or(0)
	}

	/// Number of live subscriptions
	pub fn watcher_count(&self) -> usize {
		self.lock().watchers.len()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn detach(&self, watcher_id: u64) -> impl FnOnce() + Send + 'static {
		let inner = Arc::downgrade(&self.inner);
		move || {
			if let Some(inner) = inner.upgrade() {
				let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
				inner.watchers.retain(|watcher| watcher.id != watcher_id);
			}
		}
	}
}

impl Default for MemoryDocumentStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
	async fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>> {
		let inner = self.lock();
		inner.ensure_available()?;
		Ok(read(&inner.collections, key))
	}

	async fn set(&self, key: &DocumentKey, patch: Patch) -> StoreResult<()> {
		let now = self.clock.now_millis();
		let mut inner = self.lock();
		inner.ensure_available()?;
		inner.write(key, &patch, WriteMode::Merge, now, false)
	}

	async fn update(&self, key: &DocumentKey, patch: Patch) -> StoreResult<()> {
		let now = self.clock.now_millis();
		let mut inner = self.lock();
		inner.ensure_available()?;
		inner.write(key, &patch, WriteMode::Replace, now, true)
	}

	async fn add(&self, collection: &str, patch: Patch) -> StoreResult<DocumentKey> {
		let key = DocumentKey::new(collection, uuid::Uuid::new_v4().simple().to_string());
		let now = self.clock.now_millis();
		let mut inner = self.lock();
		inner.ensure_available()?;
		inner.write(&key, &patch, WriteMode::Merge, now, false)?;
		Ok(key)
	}

	async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
		let inner = self.lock();
		inner.ensure_available()?;
		Ok(run_query(&inner.collections, query))
	}

	async fn transaction(&self, keys: &[DocumentKey], decide: &TransactionFn) -> StoreResult<bool> {
		let now = self.clock.now_millis();
		let mut inner = self.lock();
		inner.ensure_available()?;

		let current: Vec<Option<Document>> = keys
			.iter()
			.map(|key| read(&inner.collections, key))
			.collect();
		let Some(writes) = decide(&current) else {
			debug!(target: "store", keys = keys.len(), "Transaction aborted by decision step");
			return Ok(false);
		};

		// Stage every write before touching the collections
		let mut staged: Vec<(DocumentKey, Fields)> = Vec::new();
		for write in &writes {
			let base = match staged.iter().position(|(key, _)| *key == write.key) {
				Some(pos) => staged.remove(pos).1,
				None => read(&inner.collections, &write.key)
					.map(|document| document.fields)
					.ok_or_else(|| StoreError::NotFound(write.key.to_string()))?,
			};
			let mut fields = base;
			write.patch.apply(&mut fields, WriteMode::Replace, now)?;
			staged.push((write.key.clone(), fields));
		}

		let touched: Vec<DocumentKey> = staged.iter().map(|(key, _)| key.clone()).collect();
		for (key, fields) in staged {
			inner.store(&key, fields);
		}
		inner.notify(&touched);
		Ok(true)
	}

	fn watch_document(&self, key: &DocumentKey) -> StoreResult<Subscription<DocumentSnapshot>> {
		let (sender, receiver) = mpsc::unbounded_channel();
		let mut inner = self.lock();
		inner.ensure_available()?;

		let initial = DocumentSnapshot {
			key: key.clone(),
			document: read(&inner.collections, key),
		};
		// The receiver is alive, so the initial push cannot fail
		let _ = sender.send(initial);
		let id = inner.register(WatchTarget::Document {
			key: key.clone(),
			sender,
		});
		drop(inner);
		Ok(Subscription::new(receiver, self.detach(id)))
	}

	fn watch_query(&self, query: &Query) -> StoreResult<Subscription<QuerySnapshot>> {
		let (sender, receiver) = mpsc::unbounded_channel();
		let mut inner = self.lock();
		inner.ensure_available()?;

		let documents = run_query(&inner.collections, query);
		let last = index(&documents);
		let changes = documents
			.iter()
			.map(|document| DocumentChange {
				kind: ChangeKind::Added,
				document: document.clone(),
			})
			.collect();
		let _ = sender.send(QuerySnapshot {
			documents,
			changes,
			initial: true,
		});
		let id = inner.register(WatchTarget::Query {
			query: query.clone(),
			last,
			sender,
		});
		drop(inner);
		Ok(Subscription::new(receiver, self.detach(id)))
	}
}
