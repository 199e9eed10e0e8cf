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

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;

/// Query predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	/// Field equals value
	Eq(String, Value),
	/// Array field contains value
	ArrayContains(String, Value),
}

impl Filter {
	pub fn matches(&self, document: &Document) -> bool {
		match self {
			Filter::Eq(path, expected) => document.get(path) == Some(expected),
			Filter::ArrayContains(path, expected) => document
				.get(path)
				.and_then(Value::as_array)
				.is_some_and(|values| values.contains(expected)),
		}
	}
}

/// Filtered view over one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
	collection: String,
	filters: Vec<Filter>,
	order_by: Option<String>,
}

impl Query {
	pub fn collection(collection: impl Into<String>) -> Self {
		Self {
			collection: collection.into(),
			filters: Vec::new(),
			order_by: None,
		}
	}

	pub fn where_eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters.push(Filter::Eq(path.into(), value.into()));
		self
	}

	pub fn where_array_contains(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters
			.push(Filter::ArrayContains(path.into(), value.into()));
		self
	}

	/// Ascending order on `path`; documents without the field are excluded
	pub fn order_by(mut self, path: impl Into<String>) -> Self {
		self.order_by = Some(path.into());
		self
	}

	pub fn collection_path(&self) -> &str {
		&self.collection
	}

	pub fn filters(&self) -> &[Filter] {
		&self.filters
	}

	pub fn ordering(&self) -> Option<&str> {
		self.order_by.as_deref()
	}

	pub fn matches(&self, document: &Document) -> bool {
		if let Some(path) = &self.order_by
			&& document.get(path).is_none()
		{
			return false;
		}
		self.filters.iter().all(|filter| filter.matches(document))
	}

	/// Compare two documents on the ordering field
	pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
		match &self.order_by {
			Some(path) => compare_values(a.get(path), b.get(path)),
			None => Ordering::Equal,
		}
	}
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a, b) {
		(Some(Value::Number(x)), Some(Value::Number(y))) => {
			let x = x.as_f64().unwrap_or(0.0);
			let y = y.as_f64().unwrap_or(0.0);
			x.partial_cmp(&y).unwrap_or(Ordering::Equal)
		}
		(Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
		_ => Ordering::Equal,
	}
}
