//! Unified logging module for Alpaca services
//!
//! Console output plus optional daily rolling log files. HTTP access lines are
//! emitted under the [`API_ACCESS_TARGET`] target and land in their own file.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{
    filter,
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Tracing target used for per-request access lines
pub const API_ACCESS_TARGET: &str = "api_access";

/// Largest PUT body the access logger buffers; bigger bodies get 413
pub const MAX_LOGGED_BODY_BYTES: usize = 64 * 1024;

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Custom event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] Service started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Worker guards must outlive the subscriber or buffered lines are lost
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Global log root directory (initialized once from config or env)
/// Priority: ALPACA_LOG_DIR env > config_dir > default "logs"
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Errors raised while installing the global subscriber
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Initialize log root directory from config or environment
///
/// Priority:
/// 1. `ALPACA_LOG_DIR` environment variable (highest)
/// 2. `config_dir` parameter
/// 3. Default value "logs" (lowest)
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var("ALPACA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get log root directory, falling back to env or "logs" when uninitialized
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var("ALPACA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"))
    })
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used for file names and the default filter directive
    pub service_name: String,
    /// Directory for rolling log files; `None` logs to the console only
    pub log_dir: Option<PathBuf>,
    /// Level applied when `RUST_LOG` is not set
    pub console_level: Level,
    /// Write file logs as JSON lines
    pub enable_json: bool,
    /// Colorize console output
    pub enable_ansi: bool,
    /// Write `api_access` events to a separate file
    pub enable_api_log: bool,
}

impl LogConfig {
    /// Console-only configuration; services add a log directory on top
    pub fn console_only(service_name: impl Into<String>, console_level: Level) -> Self {
        Self {
            service_name: service_name.into(),
            log_dir: None,
            console_level,
            enable_json: false,
            enable_ansi: true,
            enable_api_log: false,
        }
    }

    /// Filter directives used when `RUST_LOG` is absent
    fn default_directives(&self) -> String {
        let level = self.console_level.as_str().to_lowercase();
        format!(
            "{level},{}={level},{API_ACCESS_TARGET}=info,tower_http=info",
            self.service_name
        )
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    // Respect RUST_LOG, only append api_access if not already specified
    match std::env::var("RUST_LOG") {
        Ok(env_str) if env_str.contains(API_ACCESS_TARGET) => EnvFilter::new(env_str),
        Ok(env_str) => EnvFilter::new(format!("{env_str},{API_ACCESS_TARGET}=info")),
        Err(_) => EnvFilter::new(config.default_directives()),
    }
}

fn keep_guard(guard: WorkerGuard) {
    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }
}

/// Install the global tracing subscriber
///
/// Layers:
/// - console, bracketed level format, all targets
/// - business file (`{service}.log.YYYY-MM-DD`), everything except `api_access`
/// - API file (`{service}_api.log.YYYY-MM-DD`), `api_access` only
pub fn init_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = build_filter(&config);

    let mut layers = vec![fmt::layer()
        .with_ansi(config.enable_ansi)
        .event_format(BracketedLevelFormat)
        .boxed()];

    if let Some(log_dir) = &config.log_dir {
        fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDir {
            path: log_dir.clone(),
            source,
        })?;

        let appender = rolling::daily(log_dir, format!("{}.log", config.service_name));
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        keep_guard(guard);

        let not_api = filter::filter_fn(|metadata| metadata.target() != API_ACCESS_TARGET);
        let business_layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_level(true)
                .with_target(true)
                .with_filter(not_api)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .with_filter(not_api)
                .boxed()
        };
        layers.push(business_layer);

        if config.enable_api_log {
            let api_appender =
                rolling::daily(log_dir, format!("{}_api.log", config.service_name));
            let (api_non_blocking, api_guard) = tracing_appender::non_blocking(api_appender);
            keep_guard(api_guard);

            layers.push(
                fmt::layer()
                    .with_writer(api_non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .with_filter(filter::filter_fn(|metadata| {
                        metadata.target() == API_ACCESS_TARGET
                    }))
                    .boxed(),
            );
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))
}

/// Axum middleware writing one access line per request to [`API_ACCESS_TARGET`]
///
/// PUT requests are logged at INFO, everything else at DEBUG. At DEBUG the
/// form body of a PUT is included, truncated to a few hundred bytes.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route(...)
///     .layer(axum::middleware::from_fn(common::logging::http_request_logger))
///     .with_state(state);
/// ```
#[cfg(feature = "axum")]
pub async fn http_request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::body::Body;
    use axum::response::IntoResponse;
    use std::time::Instant;
    use tracing::{debug, info, level_enabled};

    const MAX_BODY_LENGTH: usize = 500;

    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();
    let is_put = method == axum::http::Method::PUT;

    let (req, body_str) = if is_put && level_enabled!(Level::DEBUG) {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_LOGGED_BODY_BYTES).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(
                    target: "api_access",
                    method = %method,
                    uri = %uri,
                    "Rejected request body: {}",
                    e
                );
                return (
                    axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                    format!("Request body exceeds {MAX_LOGGED_BODY_BYTES} bytes"),
                )
                    .into_response();
            },
        };
        let body_str = match std::str::from_utf8(&bytes) {
            Ok(s) => truncate_body(s, MAX_BODY_LENGTH),
            Err(_) => "<binary data>".to_string(),
        };
        (
            axum::extract::Request::from_parts(parts, Body::from(bytes)),
            Some(body_str),
        )
    } else {
        (req, None)
    };

    let response = next.run(req).await;
    let duration = start.elapsed();
    let status = response.status();

    match (is_put, body_str) {
        (true, Some(body)) => debug!(
            target: "api_access",
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            request_body = %body,
            "HTTP request"
        ),
        (true, None) => info!(
            target: "api_access",
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        ),
        (false, _) => debug!(
            target: "api_access",
            method = %method,
            uri = %uri,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        ),
    }

    response
}

/// Cut `body` to at most `max` bytes on a char boundary
pub fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...({} bytes)", &body[..end], body.len())
}
