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

use async_trait::async_trait;

use crate::document::{Document, DocumentKey, Patch};
use crate::error::StoreResult;
use crate::query::Query;
use crate::subscription::{DocumentSnapshot, QuerySnapshot, Subscription};

/// Update applied when a transaction commits
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionWrite {
	pub key: DocumentKey,
	pub patch: Patch,
}

/// Decision step of a transaction
///
/// Receives the current state of every requested key (in request order) and
/// returns the writes to commit, or `None` to abort without writing. The
/// callback may run more than once if the backend retries.
pub type TransactionFn = dyn Fn(&[Option<Document>]) -> Option<Vec<TransactionWrite>> + Send + Sync;

/// Document Store trait - the shared realtime database
///
/// Capabilities assumed of the backend:
/// - Keyed documents with partial-field merge writes
/// - Equality and array-membership query predicates
/// - Push subscriptions over a document or a query, delivering the initial
///   state first and incremental changes afterwards, in commit order
/// - Multi-document atomic read-then-conditional-write transactions
///
/// This abstraction is backend-agnostic: the in-memory implementation serves
/// tests and local runs; a hosted realtime database can sit behind it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Read one document
	async fn get(&self, key: &DocumentKey) -> StoreResult<Option<Document>>;

	/// Merge-write; creates the document when missing
	async fn set(&self, key: &DocumentKey, patch: Patch) -> StoreResult<()>;

	/// Path-wise update of an existing document
	///
	/// Fails with `NotFound` when the document does not exist.
	async fn update(&self, key: &DocumentKey, patch: Patch) -> StoreResult<()>;

	/// Create a document with a generated id
	async fn add(&self, collection: &str, patch: Patch) -> StoreResult<DocumentKey>;

	/// One-shot query
	async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

	/// Atomic read-check-write over `keys`
	///
	/// Returns `Ok(true)` if the writes committed and `Ok(false)` if the
	/// decision step aborted.
	async fn transaction(&self, keys: &[DocumentKey], decide: &TransactionFn) -> StoreResult<bool>;

	/// Subscribe to one document
	fn watch_document(&self, key: &DocumentKey) -> StoreResult<Subscription<DocumentSnapshot>>;

	/// Subscribe to a query result set
	fn watch_query(&self, query: &Query) -> StoreResult<Subscription<QuerySnapshot>>;
}
