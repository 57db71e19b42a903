//! Classified source errors.
//!
//! Most of the crate propagates `anyhow::Error`. Source adapters return
//! [`SourceError`] instead, so the sync driver can tell a dropped connection
//! (worth one reconnect) apart from a bad query or a bad configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// The server could not be reached, or the session was lost.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The server answered but the query or search failed.
    #[error("query error: {0}")]
    Query(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SourceError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SourceError::Connectivity(_))
    }
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => SourceError::Connectivity(err.to_string()),
            sqlx::Error::Configuration(_) => SourceError::Config(err.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}

impl From<ldap3::LdapError> for SourceError {
    fn from(err: ldap3::LdapError) -> Self {
        match err {
            ldap3::LdapError::LdapResult { .. } => SourceError::Query(err.to_string()),
            ldap3::LdapError::FilterParsing
            | ldap3::LdapError::UrlParsing { .. }
            | ldap3::LdapError::UnknownScheme(_) => SourceError::Config(err.to_string()),
            other => SourceError::Connectivity(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_connectivity() {
        let err: SourceError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_row_not_found_is_query() {
        let err: SourceError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_connectivity());
        assert!(matches!(err, SourceError::Query(_)));
    }

    #[test]
    fn test_display() {
        let err = SourceError::Config("missing search_base".to_string());
        assert_eq!(err.to_string(), "configuration error: missing search_base");
    }
}
