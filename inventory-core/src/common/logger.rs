//! Logging Infrastructure
//!
//! Structured logging with:
//! - Daily rotating application logs (deleted after 14 days)
//! - Permanent audit logs (every inventory mutation and undo)
//! - Permanent security logs (authorization refusals)

use std::fs;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, filter, fmt, prelude::*};

const APP_LOG_RETENTION_DAYS: i64 = 14;
const AUDIT_TARGET: &str = "audit";
const SECURITY_TARGET: &str = "security";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Clean up application log files older than 14 days
///
/// Audit and security logs are never touched.
pub fn cleanup_old_logs(log_dir: &Path) -> anyhow::Result<usize> {
    use chrono::{Local, TimeZone};

    let cutoff = Local::now() - chrono::Duration::days(APP_LOG_RETENTION_DAYS);
    let app_log_dir = log_dir.join("app");
    if !app_log_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(app_log_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // app.YYYY-MM-DD (tracing-appender naming)
        let Some(date_part) = name.strip_prefix("app.").or_else(|| name.strip_prefix("app-"))
        else {
            continue;
        };
        let date_part = date_part.strip_suffix(".log").unwrap_or(date_part);
        let Ok(naive_date) = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        let Some(midnight) = naive_date.and_hms_opt(0, 0, 0) else {
            continue;
        };
        if let Some(local_datetime) = Local.from_local_datetime(&midnight).single()
            && local_datetime < cutoff
        {
            fs::remove_file(&path)?;
            removed += 1;
            tracing::info!(file = %name, "Deleted old log file");
        }
    }

    Ok(removed)
}

fn file_layer<S>(dir: &Path, prefix: &str, json_format: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, prefix);
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(appender));
    if json_format {
        layer.json().with_current_span(true).boxed()
    } else {
        layer.boxed()
    }
}

/// Initialize the logging system with daily rotating logs
///
/// # Arguments
/// * `level` - Log level (e.g., "info", "debug"); `RUST_LOG` takes precedence
/// * `json_format` - JSON output for production, pretty output for development
/// * `log_dir` - Optional directory for file logging (e.g., Some("./work_dir/logs"))
pub fn init_logger_with_file(
    level: &str,
    json_format: bool,
    log_dir: Option<&str>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer: BoxedLayer<_> = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let mut layers = vec![console_layer];

    if let Some(dir) = log_dir {
        let log_dir = Path::new(dir);
        let app_dir = log_dir.join("app");
        let audit_dir = log_dir.join(AUDIT_TARGET);
        let security_dir = log_dir.join(SECURITY_TARGET);
        for d in [&app_dir, &audit_dir, &security_dir] {
            fs::create_dir_all(d)?;
        }

        layers.push(
            file_layer(&app_dir, "app", json_format)
                .with_filter(filter::filter_fn(|meta| {
                    meta.target() != AUDIT_TARGET && meta.target() != SECURITY_TARGET
                }))
                .boxed(),
        );
        layers.push(
            file_layer(&audit_dir, AUDIT_TARGET, json_format)
                .with_filter(filter::filter_fn(|meta| meta.target() == AUDIT_TARGET))
                .boxed(),
        );
        layers.push(
            file_layer(&security_dir, SECURITY_TARGET, json_format)
                .with_filter(filter::filter_fn(|meta| meta.target() == SECURITY_TARGET))
                .boxed(),
        );

        if tokio::runtime::Handle::try_current().is_ok() {
            tokio::spawn(periodic_cleanup(log_dir.to_path_buf()));
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(())
}

/// Periodic cleanup task - runs daily
async fn periodic_cleanup(log_dir: PathBuf) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 3600));
    loop {
        interval.tick().await;
        if let Err(e) = cleanup_old_logs(&log_dir) {
            tracing::error!(error = %e, "Failed to cleanup old logs");
        }
    }
}

/// Initialize console-only logging
pub fn init_logger(level: &str) -> anyhow::Result<()> {
    init_logger_with_file(level, false, None)
}

/// Audit log helper - records every committed inventory mutation
///
/// ```ignore
/// audit_log!(actor.id(), "MOVE", "inventory:42", "5 units Row 1 -> Row 2");
/// ```
#[macro_export]
macro_rules! audit_log {
    ($user_id:expr, $action:expr, $resource:expr) => {
        tracing::info!(
            target: "audit",
            user_id = %$user_id,
            action = %$action,
            resource = %$resource,
            "AUDIT"
        );
    };
    ($user_id:expr, $action:expr, $resource:expr, $details:expr) => {
        tracing::info!(
            target: "audit",
            user_id = %$user_id,
            action = %$action,
            resource = %$resource,
            details = %$details,
            "AUDIT"
        );
    };
}

/// Security log helper - records authorization refusals
///
/// ```ignore
/// security_log!("location_create_denied", user_id = actor.id(), location = name.as_str());
/// ```
#[macro_export]
macro_rules! security_log {
    ($event:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::warn!(
            target: "security",
            event = $event,
            $($key = $value),*
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_removes_only_old_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        fs::create_dir_all(&app).unwrap();
        fs::write(app.join("app.2000-01-01"), "old").unwrap();
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        fs::write(app.join(format!("app.{}", today)), "new").unwrap();
        fs::write(app.join("notes.txt"), "keep").unwrap();

        let removed = cleanup_old_logs(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!app.join("app.2000-01-01").exists());
        assert!(app.join(format!("app.{}", today)).exists());
        assert!(app.join("notes.txt").exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path()).unwrap(), 0);
    }
}
