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

//! Documents, keys and field-level patches
//!
//! A document is a JSON object. Nested maps are addressed with dotted field
//! paths (`completedBy.uid`). Patches are ordered lists of field operations
//! applied either as a deep merge (`set` with merge) or as a path-wise
//! replacement (`update`).

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::timestamp;

pub type Fields = Map<String, Value>;

/// Address of a document: collection path plus document id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
	collection: String,
	id: String,
}

impl DocumentKey {
	pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			id: id.into(),
		}
	}

	pub fn collection(&self) -> &str {
		&self.collection
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	/// Collection path of a sub-collection under this document
	pub fn child_collection(&self, name: &str) -> String {
		format!("{}/{}/{}", self.collection, self.id, name)
	}
}

impl fmt::Display for DocumentKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.collection, self.id)
	}
}

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
	pub id: String,
	pub fields: Fields,
}

impl Document {
	pub fn new(id: impl Into<String>, fields: Fields) -> Self {
		Self {
			id: id.into(),
			fields,
		}
	}

	/// Resolve a dotted field path
	pub fn get(&self, path: &str) -> Option<&Value> {
		let mut segments = path.split('.');
		let mut current = self.fields.get(segments.next()?)?;
		for segment in segments {
			current = current.as_object()?.get(segment)?;
		}
		Some(current)
	}

	pub fn str_field(&self, path: &str) -> Option<&str> {
		self.get(path).and_then(Value::as_str)
	}

	pub fn bool_field(&self, path: &str) -> Option<bool> {
		self.get(path).and_then(Value::as_bool)
	}

	/// String entries of an array field; non-strings are skipped
	pub fn string_list(&self, path: &str) -> Vec<String> {
		self.get(path)
			.and_then(Value::as_array)
			.map(|values| {
				values
					.iter()
					.filter_map(Value::as_str)
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default()
	}

	pub fn timestamp(&self, path: &str) -> Option<DateTime<Utc>> {
		self.get(path).and_then(timestamp::parse)
	}

	/// Timestamp in epoch milliseconds, `0` when absent or unreadable
	pub fn millis(&self, path: &str) -> i64 {
		self.timestamp(path)
			.map(|ts| ts.timestamp_millis())
			.unwrap_or(0)
	}
}

/// A single field operation
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
	Set(Value),
	Delete,
	/// Resolved to the store's clock at commit time
	ServerTimestamp,
}

/// How object values combine with existing fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
	/// Object values merge key by key into existing objects
	Merge,
	/// The value at each path is replaced as a whole
	Replace,
}

/// Ordered set of field operations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
	ops: Vec<(String, FieldOp)>,
}

impl Patch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
		self.ops.push((path.into(), FieldOp::Set(value.into())));
		self
	}

	pub fn delete(mut self, path: impl Into<String>) -> Self {
		self.ops.push((path.into(), FieldOp::Delete));
		self
	}

	pub fn server_timestamp(mut self, path: impl Into<String>) -> Self {
		self.ops.push((path.into(), FieldOp::ServerTimestamp));
		self
	}

	/// Append every operation of `other`
	pub fn extend(mut self, other: Patch) -> Self {
		self.ops.extend(other.ops);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}

	pub fn ops(&self) -> &[(String, FieldOp)] {
		&self.ops
	}

	pub fn touches(&self, path: &str) -> bool {
		self.ops.iter().any(|(p, _)| p == path)
	}

	/// Apply to `fields`, resolving server timestamps to `now_millis`
	pub fn apply(&self, fields: &mut Fields, mode: WriteMode, now_millis: i64) -> Result<(), StoreError> {
		for (path, op) in &self.ops {
			let segments: Vec<&str> = path.split('.').collect();
			if segments.iter().any(|s| s.is_empty()) {
				return Err(StoreError::InvalidPath(path.clone()));
			}
			match op {
				FieldOp::Set(value) => write_path(fields, &segments, value.clone(), mode),
				FieldOp::ServerTimestamp => {
					write_path(fields, &segments, Value::from(now_millis), WriteMode::Replace)
				}
				FieldOp::Delete => delete_path(fields, &segments),
			}
		}
		Ok(())
	}
}

fn write_path(fields: &mut Fields, segments: &[&str], value: Value, mode: WriteMode) {
	let (last, parents) = match segments.split_last() {
		Some(split) => split,
		None => return,
	};
	let mut current = fields;
	for segment in parents {
		let entry = current
			.entry(segment.to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		if !entry.is_object() {
			*entry = Value::Object(Map::new());
		}
		current = match entry.as_object_mut() {
			Some(map) => map,
			None => return,
		};
	}
	if mode == WriteMode::Merge
		&& let Value::Object(incoming) = value
	{
		if let Some(Value::Object(existing)) = current.get_mut(*last) {
			merge_objects(existing, incoming);
		} else {
			current.insert(last.to_string(), Value::Object(incoming));
		}
		return;
	}
	current.insert(last.to_string(), value);
}

fn merge_objects(existing: &mut Fields, incoming: Fields) {
	for (key, value) in incoming {
		match value {
			Value::Object(next) => {
				if let Some(Value::Object(inner)) = existing.get_mut(&key) {
					merge_objects(inner, next);
				} else {
					existing.insert(key, Value::Object(next));
				}
			}
			value => {
				existing.insert(key, value);
			}
		}
	}
}

fn delete_path(fields: &mut Fields, segments: &[&str]) {
	let (last, parents) = match segments.split_last() {
		Some(split) => split,
		None => return,
	};
	let mut current = fields;
	for segment in parents {
		current = match current.get_mut(*segment).and_then(Value::as_object_mut) {
			Some(map) => map,
			None => return,
		};
	}
	current.remove(*last);
}
