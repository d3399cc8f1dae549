//! Tagged error taxonomy for the watcher.
//!
//! Every fallible operation returns a [`WatcherError`] carrying a [`Kind`]
//! tag and a stack of `pkg:op` breadcrumbs so failures deep inside a sync can
//! be attributed to the operation chain that produced them.

use thiserror::Error;

/// Classification tag for a [`WatcherError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Kind {
    /// Any data-store failure. Retry at the caller's discretion.
    #[error("database error")]
    Database,
    /// Semantic "no row". Callers routinely treat this as non-fatal.
    #[error("not found")]
    DatabaseResultNotFound,
    /// Node client or IPFS gateway failure. Non-fatal per-sync, fatal
    /// per-operation.
    #[error("upstream error")]
    Upstream,
    /// A community document that did not parse. Recorded into
    /// `community_json.malformed` and the sync succeeds.
    #[error("malformed document")]
    DecodeMalformed,
    /// Programmer error, e.g. an upsert with a preset id.
    #[error("invalid argument")]
    InvalidArgument,
}

/// Error type used throughout the crate.
#[derive(Debug)]
pub struct WatcherError {
    kind: Kind,
    ops: Vec<&'static str>,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, WatcherError>;

impl WatcherError {
    pub fn new(kind: Kind, op: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            ops: vec![op],
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: Kind,
        op: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            ops: vec![op],
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn database(op: &'static str, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => {
                Self::with_source(Kind::DatabaseResultNotFound, op, source)
            }
            other => Self::with_source(Kind::Database, op, other),
        }
    }

    pub fn upstream(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(Kind::Upstream, op, message)
    }

    pub fn invalid_argument(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(Kind::InvalidArgument, op, message)
    }

    pub fn malformed(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(Kind::DecodeMalformed, op, message)
    }

    pub fn not_found(op: &'static str, message: impl Into<String>) -> Self {
        Self::new(Kind::DatabaseResultNotFound, op, message)
    }

    /// Push an operation breadcrumb. The newest op renders first.
    #[must_use]
    pub fn op(mut self, op: &'static str) -> Self {
        self.ops.push(op);
        self
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// True when the error is the semantic "no row" case.
    pub fn is_not_found(&self) -> bool {
        self.kind == Kind::DatabaseResultNotFound
    }
}

impl std::fmt::Display for WatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for op in self.ops.iter().rev() {
            write!(f, "{op}: ")?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

impl From<reqwest::Error> for WatcherError {
    fn from(err: reqwest::Error) -> Self {
        Self::with_source(Kind::Upstream, "http:request", err)
    }
}

/// Attach an operation breadcrumb to the error of a `Result`.
pub trait ResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| e.op(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breadcrumbs_render_newest_first() {
        let err = WatcherError::upstream("nfd:get_box", "boom")
            .op("nfd:get_nfd_data")
            .op("nfd:sync");
        assert_eq!(
            err.to_string(),
            "nfd:sync: nfd:get_nfd_data: nfd:get_box: upstream error: boom"
        );
    }

    #[test]
    fn test_row_not_found_maps_to_not_found_kind() {
        let err = WatcherError::database("db:get_provider", sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert_eq!(err.kind(), Kind::DatabaseResultNotFound);
    }

    #[test]
    fn test_result_ext_is_noop_on_ok() {
        let ok: Result<u64> = Ok(7);
        assert_eq!(ok.op("db:get").unwrap(), 7);
    }
}
