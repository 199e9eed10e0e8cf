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

use serde::{Deserialize, Serialize};

use crate::types::{ItemMark, MarkStatus};

/// Fixed badge categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
	Shiny,
	Nebula,
	Rainbow,
	#[serde(other)]
	Misc,
}

impl Category {
	pub fn as_str(&self) -> &'static str {
		match self {
			Category::Shiny => "shiny",
			Category::Nebula => "nebula",
			Category::Rainbow => "rainbow",
			Category::Misc => "misc",
		}
	}

	fn rank(&self) -> u8 {
		match self {
			Category::Shiny => 1,
			Category::Nebula => 2,
			Category::Rainbow => 3,
			Category::Misc => 99,
		}
	}
}

/// One tradeable badge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
	pub id: String,
	pub category: Category,
	#[serde(default)]
	pub category_label: Option<String>,
	pub number: u32,
	/// Asset reference
	pub src: String,
}

/// Static list of tradeable items
#[derive(Debug, Clone, Default)]
pub struct Catalog {
	items: Vec<CatalogItem>,
}

impl Catalog {
	pub fn new(mut items: Vec<CatalogItem>) -> Self {
		items.sort_by(|a, b| {
			a.category
				.rank()
				.cmp(&b.category.rank())
				.then(a.number.cmp(&b.number))
		});
		Self { items }
	}

	/// Load the generated item list (a JSON array)
	pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
		let items: Vec<CatalogItem> = serde_json::from_str(raw)?;
		Ok(Self::new(items))
	}

	pub fn items(&self) -> &[CatalogItem] {
		&self.items
	}

	pub fn get(&self, id: &str) -> Option<&CatalogItem> {
		self.items.iter().find(|item| item.id == id)
	}

	/// Display label such as `"shiny 3"`
	pub fn label(&self, id: &str) -> Option<String> {
		self.get(id).map(|item| {
			let category = item
				.category_label
				.as_deref()
				.unwrap_or(item.category.as_str());
			format!("{} {}", category, item.number)
		})
	}

	/// Every item unmarked, in catalog order
	pub fn blank_marks(&self) -> Vec<ItemMark> {
		self.items
			.iter()
			.map(|item| ItemMark::new(item.id.clone(), MarkStatus::Center))
			.collect()
	}
}
