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

//! Barter Store - document store and local persistence contracts
//!
//! The matching core talks to its shared realtime database and to local
//! key-value storage only through the traits in this crate:
//! - [`DocumentStore`]: keyed documents, merge writes, equality and
//!   array-membership queries, push subscriptions, atomic transactions
//! - [`KeyValueStore`]: string key-value persistence (durable or session)
//! - [`Clock`]: time source for server timestamps and expiry checks
//!
//! In-memory implementations back the tests and local runs.

pub mod clock;
pub mod document;
pub mod error;
pub mod kv;
pub mod memory;
pub mod query;
pub mod store;
pub mod subscription;
pub mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{Document, DocumentKey, FieldOp, Fields, Patch, WriteMode};
pub use error::{KvError, StoreError, StoreResult};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use memory::MemoryDocumentStore;
pub use query::{Filter, Query};
pub use store::{DocumentStore, TransactionFn, TransactionWrite};
pub use subscription::{
	ChangeKind, DocumentChange, DocumentSnapshot, QuerySnapshot, Subscription,
};
