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

//! Logging initialization for the barter client
//!
//! # Configuration
//!
//! - `RUST_LOG`: Log level filter (default: `info`)
//!   - Can be set per module: `RUST_LOG=barter_matching=debug,barter_store=info`
//!
//! - `LOG_DIR`: Root directory for log files (default: `{project_root}/logs`)
//!   - Log files are created in `{LOG_DIR}/barter/`
//!
//! - `LOG_TO_CONSOLE`: Enable console output (default: `false`)
//!   - Set to `true`, `1`, or `yes` to also write to stderr with ANSI colors
//!
//! # Log File Format
//!
//! - Rotation: one file per day (UTC), e.g. `barter.2026-01-03.log`
//! - Format: UTC timestamp, thread ID, log level, target, message
//!
//! Components log under fixed targets: `presence`, `selection`, `matcher`,
//! `trade`, `recovery`, `notify`, `client`.

use std::{
	env, fs, io,
	path::{Path, PathBuf},
	sync::OnceLock,
};

use anyhow::{Context, Result};
use tracing::{Subscriber, info};
use tracing_appender::{
	non_blocking::{NonBlocking, WorkerGuard},
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
	EnvFilter, Layer,
	fmt::{self, MakeWriter, time::UtcTime},
	layer::SubscriberExt,
	registry::{LookupSpan, Registry},
	util::SubscriberInitExt,
};

use crate::config::{DEFAULT_LOG_LEVEL, DEFAULT_LOG_TO_CONSOLE, LOG_COMPONENT_NAME};

// Flushes the file writer on exit
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging settings resolved from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
	/// Fallback filter when `RUST_LOG` does not parse
	pub level: String,
	pub directory: PathBuf,
	pub console: bool,
}

impl LogSettings {
	pub fn from_env() -> Self {
		let console = env::var("LOG_TO_CONSOLE")
			.map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
			.unwrap_or(DEFAULT_LOG_TO_CONSOLE);
		Self {
			level: env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
			directory: Path::new(&log_root()).join(LOG_COMPONENT_NAME),
			console,
		}
	}
}

/// Nearest ancestor whose manifest declares a `[workspace]`
fn workspace_root() -> PathBuf {
	let start = env::var_os("CARGO_MANIFEST_DIR")
		.map(PathBuf::from)
		.or_else(|| env::current_dir().ok())
		.unwrap_or_else(|| PathBuf::from("."));
	let found = start
		.ancestors()
		.find(|dir| {
			fs::read_to_string(dir.join("Cargo.toml"))
				.is_ok_and(|manifest| manifest.contains("[workspace]"))
		})
		.map(Path::to_path_buf);
	found.unwrap_or(start)
}

/// Log root from `LOG_DIR`, else `{workspace_root}/logs`
pub fn log_root() -> String {
	env::var("LOG_DIR")
		.unwrap_or_else(|_| workspace_root().join("logs").to_string_lossy().into_owned())
}

fn file_writer(directory: &Path) -> Result<NonBlocking> {
	fs::create_dir_all(directory)
		.with_context(|| format!("Failed to create log directory: {}", directory.display()))?;
	let appender = RollingFileAppender::builder()
		.rotation(Rotation::DAILY)
		.filename_prefix(LOG_COMPONENT_NAME)
		.filename_suffix("log")
		.build(directory)
		.with_context(|| format!("Failed to create rolling file appender in {}", directory.display()))?;

	let (writer, guard) = tracing_appender::non_blocking(appender);
	// Only the first installed writer keeps its guard
	let _ = LOG_GUARD.set(guard);
	Ok(writer)
}

fn fmt_layer<S, W>(writer: W, ansi: bool) -> impl Layer<S>
where
	S: Subscriber + for<'span> LookupSpan<'span>,
	W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
	fmt::layer()
		.with_writer(writer)
		.with_timer(UtcTime::rfc_3339())
		.with_thread_ids(true)
		.with_target(true)
		.with_ansi(ansi)
}

/// Initialize logging with file output and optional console output
///
/// See module-level documentation for environment variable configuration.
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<()> {
	dotenv::dotenv().ok();
	let settings = LogSettings::from_env();

	let writer = file_writer(&settings.directory)?;
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
	let console = settings.console.then(|| fmt_layer(io::stderr, true));

	Registry::default()
		.with(filter)
		.with(fmt_layer(writer, false))
		.with(console)
		.try_init()
		.context("Failed to install tracing subscriber")?;

	info!(
		target: "client",
		level = %settings.level,
		directory = %settings.directory.display(),
		console = settings.console,
		"Logging initialized, daily files {}.YYYY-MM-DD.log",
		LOG_COMPONENT_NAME
	);
	Ok(())
}
