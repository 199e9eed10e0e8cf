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

//! Timestamp encoding
//!
//! Timestamps are written as epoch milliseconds. Older records may carry
//! `{"seconds": n, "nanos": m}` objects or RFC 3339 strings; both are read.

use chrono::{DateTime, Utc};
use serde_json::Value;

pub fn to_value(ts: DateTime<Utc>) -> Value {
	Value::from(ts.timestamp_millis())
}

pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
	DateTime::from_timestamp_millis(millis)
}

/// Decode a timestamp-like value; zero and unreadable values are absent
pub fn parse(value: &Value) -> Option<DateTime<Utc>> {
	let millis = match value {
		Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
		Value::Object(map) => {
			let seconds = map.get("seconds").and_then(Value::as_i64)?;
			let nanos = map.get("nanos").and_then(Value::as_i64).unwrap_or(0);
			seconds * 1000 + nanos / 1_000_000
		}
		Value::String(raw) => DateTime::parse_from_rfc3339(raw)
			.ok()?
			.with_timezone(&Utc)
			.timestamp_millis(),
		_ => return None,
	};
	if millis == 0 {
		return None;
	}
	from_millis(millis)
}
