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

//! Barter SDK - shared types for badge matching and trading
//!
//! This crate holds the domain vocabulary shared by the store adapters and
//! the matching core: presence and activity, give/get selections, user and
//! trade-session records, chat messages, ranked match candidates, page
//! routes and the item catalog.
//!
//! The SDK is designed to be lightweight and embeddable:
//! - No background threads
//! - No runtime initialization
//! - No I/O

pub mod catalog;
pub mod route;
pub mod types;

pub use catalog::{Catalog, CatalogItem, Category};
pub use route::{ChatParams, Route};
pub use types::*;
