//! Snapshot store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open snapshot store: {0}")]
    Open(String),

    /// Any redb transaction, table, read or write failure.
    #[error("snapshot storage: {0}")]
    Storage(String),

    #[error("cannot encode {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored record no longer parses, e.g. written by a newer schema.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn encode(what: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let what = what.into();
        move |source| StateError::Encode { what, source }
    }

    pub(crate) fn corrupt(key: &str) -> impl FnOnce(serde_json::Error) -> Self {
        let key = key.to_string();
        move |source| StateError::Corrupt { key, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_names_the_key() {
        let source = serde_json::from_slice::<u64>(b"{").unwrap_err();
        let err = StateError::corrupt("run-1:0000000003")(source);
        assert!(err.to_string().starts_with("corrupt record at run-1:0000000003"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
