use crate::registry::MetricType;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered")]
    DuplicateName { name: String },

    #[error("metric `{name}` is not registered")]
    NotFound { name: String },

    #[error("metric `{name}` is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricType,
        actual: MetricType,
    },

    #[error("invalid argument for `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("label `{label}` does not match the declared labels of `{name}` ({declared:?})")]
    LabelMismatch {
        name: String,
        label: String,
        declared: Vec<String>,
    },
}

impl Error {
    /// Map an error from the underlying `prometheus` metric onto this
    /// taxonomy.
    #[must_use]
    pub fn from_prometheus(name: &str, err: prometheus::Error) -> Self {
        match err {
            prometheus::Error::AlreadyReg => Self::DuplicateName {
                name: name.to_string(),
            },
            other => Self::invalid_argument(name, other.to_string()),
        }
    }

    #[must_use]
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
