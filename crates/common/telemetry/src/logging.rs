// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Global `tracing` setup for spool binaries and tests.
//!
//! Logs go to stdout and, when a directory is configured, to hourly-rotated
//! files plus a separate error-only file. The level filter can be changed at
//! runtime through [`RELOAD_HANDLE`].

use std::{
    env,
    io::IsTerminal,
    sync::{Mutex, Once},
};

use bon::Builder;
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Deserializer, Serialize, de};
use smart_default::SmartDefault;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{RollingFileAppender, Rotation},
};
use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter, layer::SubscriberExt, prelude::*, registry::LookupSpan,
};

/// Deserializes a string, falling back to `T::default()` when it is empty.
///
/// # Errors
/// Returns an error if the non-empty string is not a valid `T`.
pub fn empty_string_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        Ok(T::default())
    } else {
        T::deserialize(de::value::StrDeserializer::new(&s)).map_err(|e: de::value::Error| {
            de::Error::custom(format!("invalid value, expect empty string, err: {e}"))
        })
    }
}

/// The default directory name for log files when file logging is enabled.
pub const DEFAULT_LOGGING_DIR: &str = "logs";

/// Handle for changing the level filter after [`init_global_logging`] ran.
///
/// `None` until logging has been initialized.
pub static RELOAD_HANDLE: OnceCell<tracing_subscriber::reload::Handle<filter::Targets, Registry>> =
    OnceCell::new();

/// Configuration options for the logging system.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct LoggingOptions {
    /// Directory for rotated log files. Empty means stdout only.
    #[default = ""]
    #[builder(default)]
    pub dir: String,

    /// Level filter such as `"info"` or `"info,spool_queue=debug"`. Falls
    /// back to `RUST_LOG`, then `"info"`.
    pub level: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_default")]
    #[builder(default)]
    pub log_format: LogFormat,

    /// Maximum number of rotated files kept per log stream.
    #[default = 720]
    #[builder(default = 720)]
    pub max_log_files: usize,

    /// Also write to stdout when logging to files.
    #[default = true]
    #[builder(default = true)]
    pub append_stdout: bool,
}

/// Available log output formats.
#[derive(
    Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize, Default, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, for log pipelines.
    Json,

    /// Human-readable lines.
    ///
    /// ```text
    /// 2024-01-01T12:00:00.123Z  INFO spool_queue::store: Queue opened
    /// ```
    #[default]
    Text,
}

/// Initialize stdout logging with default options.
///
/// Keep the returned guards alive for as long as logs should be flushed.
#[must_use]
pub fn init_tracing_subscriber(app_name: &str) -> Vec<WorkerGuard> {
    init_global_logging(app_name, &LoggingOptions::default())
}

/// Initialize file logging for unit tests.
///
/// Reads `UNITTEST_LOG_DIR` (default `/tmp/__unittest_logs`) and
/// `UNITTEST_LOG_LEVEL`. Safe to call from every test; only the first call
/// has an effect.
pub fn init_default_ut_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        let dir =
            env::var("UNITTEST_LOG_DIR").unwrap_or_else(|_| "/tmp/__unittest_logs".to_string());
        let level = env::var("UNITTEST_LOG_LEVEL")
            .unwrap_or_else(|_| "debug,tokio=info,runtime=info".to_string());

        let opts = LoggingOptions::builder().dir(dir.clone()).level(level).build();
        let guards = init_global_logging("unittest", &opts);
        if let Ok(mut slot) = GLOBAL_UT_LOG_GUARD.lock() {
            *slot = Some(guards);
        }

        tracing::info!("logs dir = {}", dir);
    });
}

/// Keeps the unit-test writer threads alive for the whole test binary.
static GLOBAL_UT_LOG_GUARD: Lazy<Mutex<Option<Vec<WorkerGuard>>>> = Lazy::new(|| Mutex::new(None));

const DEFAULT_LOG_TARGETS: &str = "info";

fn fmt_layer<S>(writer: NonBlocking, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::Layer::new()
            .json()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::Layer::new()
            .with_writer(writer)
            .with_ansi(ansi)
            .boxed(),
    }
}

fn rolling_appender(prefix: &str, opts: &LoggingOptions) -> RollingFileAppender {
    RollingFileAppender::builder()
        .rotation(Rotation::HOURLY)
        .filename_prefix(prefix)
        .max_log_files(opts.max_log_files)
        .build(&opts.dir)
        .unwrap_or_else(|e| {
            panic!(
                "initializing rolling file appender at {} failed: {}",
                &opts.dir, e
            )
        })
}

/// Initialize the global subscriber.
///
/// Layers, depending on `opts`:
/// - stdout (if `append_stdout`)
/// - `<dir>/<app_name>.*` with hourly rotation (if `dir` is set)
/// - `<dir>/<app_name>-err.*` carrying only errors (if `dir` is set)
///
/// Only the first call in a process has an effect; later calls return no
/// guards.
///
/// # Panics
/// Panics if the log directory cannot be used or the level string does not
/// parse.
pub fn init_global_logging(app_name: &str, opts: &LoggingOptions) -> Vec<WorkerGuard> {
    static START: Once = Once::new();
    let mut guards = vec![];

    START.call_once(|| {
        LogTracer::init().expect("log tracer must be valid");

        let stdout_logging_layer = opts.append_stdout.then(|| {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            guards.push(guard);
            fmt_layer(writer, opts.log_format, std::io::stdout().is_terminal())
        });

        let (file_logging_layer, err_file_logging_layer) = if opts.dir.is_empty() {
            (None, None)
        } else {
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(app_name, opts));
            guards.push(guard);
            let file_layer = fmt_layer(writer, opts.log_format, false);

            let err_prefix = format!("{app_name}-err");
            let (writer, guard) =
                tracing_appender::non_blocking(rolling_appender(&err_prefix, opts));
            guards.push(guard);
            let err_layer = fmt_layer(writer, opts.log_format, false)
                .with_filter(filter::LevelFilter::ERROR)
                .boxed();

            (Some(file_layer), Some(err_layer))
        };

        let filter = opts
            .level
            .as_deref()
            .or(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
            .unwrap_or(DEFAULT_LOG_TARGETS)
            .parse::<filter::Targets>()
            .expect("error parsing log level string");

        let (dyn_filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);

        RELOAD_HANDLE
            .set(reload_handle)
            .expect("reload handle already set, maybe init_global_logging get called twice?");

        let subscriber = Registry::default()
            .with(dyn_filter)
            .with(stdout_logging_layer)
            .with(file_logging_layer)
            .with(err_file_logging_layer);

        tracing::subscriber::set_global_default(subscriber)
            .expect("error setting global tracing subscriber");
    });

    guards
}
