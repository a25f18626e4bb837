use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("store error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("query on `{collection}` timed out after {elapsed_ms}ms")]
    QueryTimeout { collection: String, elapsed_ms: u64 },
    #[error("store unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),
    #[error("malformed pipeline: {0}")]
    Pipeline(String),
    #[error("cache error: {0}")]
    Cache(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn cache(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Cache(Box::new(source))
    }

    /// Whether a retry can plausibly succeed. Only connectivity-shaped
    /// failures qualify; malformed queries and timeouts surface directly.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Db(sqlx::Error::Io(_)) => true,
            Error::Db(sqlx::Error::PoolTimedOut) => true,
            Error::Db(sqlx::Error::Database(db)) => matches!(
                db.code().as_deref(),
                // connection_exception family, cannot_connect_now, too_many_connections
                Some("08000" | "08003" | "08006" | "57P03" | "53300")
            ),
            _ => false,
        }
    }
}

pub trait WithContext<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: msg.into(),
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(Error::Db(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn timeouts_and_bad_queries_are_not_retried() {
        let timeout = Error::QueryTimeout {
            collection: "brands".into(),
            elapsed_ms: 30_000,
        };
        assert!(!timeout.is_transient());
        assert!(!Error::Db(sqlx::Error::RowNotFound).is_transient());
        assert!(!Error::InvalidCollection("drop table;".into()).is_transient());
    }
}
