use std::{
    io::{Sink, sink},
    path::PathBuf,
};

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{
        MakeWriter,
        writer::{EitherWriter, MakeWriterExt as _},
    },
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub mod controller;

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter, e.g. `BACKSTAGE_OPERATOR_LOG`.
/// If the variable is not set or invalid, the maximum log level is INFO.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` (e.g.
/// `BACKSTAGE_OPERATOR_LOG_DIRECTORY`) to a directory path. This file will be
/// rotated regularly.
pub fn initialize_logging(env: &str, app_name: &str) {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::INFO.into()));

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender_result = file_appender_directory.as_deref().map(|log_dir| {
        RollingFileAppender::builder()
            .filename_suffix(format!("{app_name}.log"))
            .max_log_files(6)
            .build(log_dir)
    });
    let (file_appender, file_appender_error) = match file_appender_result {
        Some(Ok(appender)) => (Some(appender), None),
        Some(Err(error)) => (None, Some(error)),
        None => (None, None),
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout.and(OptionalMakeWriter::from(file_appender)));
    // Fails if a subscriber is already installed, e.g. by another test.
    if Registry::default().with(filter).with(fmt).try_init().is_err() {
        return;
    }

    // need to delay logging until after tracing is initialized
    match (file_appender_directory, file_appender_error) {
        (Some(dir), None) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        (Some(dir), Some(error)) => tracing::warn!(
            directory = %dir.display(),
            error = &error as &dyn std::error::Error,
            "failed to initialize rolling file appender, file logging disabled"
        ),
        (None, _) => tracing::debug!("file logging disabled, because no log directory set"),
    }
}

/// Like [`EitherWriter`] but implements [`MakeWriter`] instead of [`std::io::Write`].
/// For selecting writers depending on dynamic configuration.
enum EitherMakeWriter<A, B> {
    A(A),
    B(B),
}

impl<'a, A, B> MakeWriter<'a> for EitherMakeWriter<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = EitherWriter<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer()),
            Self::B(b) => EitherWriter::B(b.make_writer()),
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        match self {
            Self::A(a) => EitherWriter::A(a.make_writer_for(meta)),
            Self::B(b) => EitherWriter::B(b.make_writer_for(meta)),
        }
    }
}

type OptionalMakeWriter<T> = EitherMakeWriter<T, fn() -> Sink>;

impl<T> From<Option<T>> for OptionalMakeWriter<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(t) => Self::A(t),
            None => Self::B(sink),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::{debug, error, info};

    // Mostly a sanity check, run with `--nocapture` to see the output, and
    // set NOT_SET=debug to also see DEBUG messages.
    #[test]
    fn default_tracing_level_is_info() {
        super::initialize_logging("NOT_SET", "test");
        // A second call must not panic.
        super::initialize_logging("NOT_SET", "test");

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if you set the NOT_SET env var.");
    }
}
