//! provides logging helpers

use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::Layer;

/// Environment variable that redirects logs into a rolling file.
pub const LOG_PATH_ENV_VAR: &str = "ARENA_LOG_PATH";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("log path `{0}` has no file name")]
    InvalidPath(PathBuf),

    #[error("failed to create rolling file appender in `{path}`")]
    Appender {
        path: PathBuf,
        #[source]
        source: tracing_appender::rolling::InitError,
    },
}

/// initiate the global tracing subscriber, writing to `log_path` when given.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the lifetime of the process.
///
/// # Errors
///
/// - [`LoggingError::InvalidPath`] if the path has no file name
/// - [`LoggingError::Appender`] if the log directory cannot be used
pub fn init_with_path(log_path: Option<PathBuf>) -> Result<Option<WorkerGuard>, LoggingError> {
    let log_path = log_path.or_else(|| std::env::var(LOG_PATH_ENV_VAR).ok().map(PathBuf::from));
    let (fmt_layer, guard) = get_fmt_layer(log_path.as_deref())?;
    registry().with(fmt_layer).init();
    Ok(guard)
}

/// Builds the fmt layer: stderr by default, a daily rolling file when a path is set.
///
/// # Errors
///
/// - [`LoggingError::InvalidPath`] if the path has no file name
/// - [`LoggingError::Appender`] if the log directory cannot be used
pub fn get_fmt_layer(
    log_path: Option<&Path>,
) -> Result<(BoxedLayer, Option<WorkerGuard>), LoggingError> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let Some(log_path) = log_path else {
        let fmt_layer = layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(env_filter)
            .boxed();
        return Ok((fmt_layer, None));
    };

    let file_name = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LoggingError::InvalidPath(log_path.to_path_buf()))?;
    let directory = log_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(3)
        .build(directory)
        .map_err(|source| LoggingError::Appender {
            path: directory.to_path_buf(),
            source,
        })?;

    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let fmt_layer = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter)
        .boxed();

    Ok((fmt_layer, Some(guard)))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn stderr_layer_has_no_guard() {
        let (_layer, guard) = get_fmt_layer(None).expect("stderr layer");
        assert!(guard.is_none());
    }

    #[test]
    fn file_layer_returns_guard() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("arena.log");
        let (_layer, guard) = get_fmt_layer(Some(&path)).expect("file layer");
        assert!(guard.is_some());
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        let result = get_fmt_layer(Some(Path::new("/")));
        assert!(matches!(result, Err(LoggingError::InvalidPath(_))));
    }
}
