use {
    axum::{
        Json,
        extract::rejection::JsonRejection,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::Serialize,
    tracing::error,
};

/// A single failed validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub rule: &'static str,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed {}", self.field, self.rule)
    }
}

/// Errors returned by the timetable API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("timetable entry not found")]
    NotFound,

    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),

    /// The request body could not be read as a timetable entry.
    #[error("{message}")]
    InvalidBody { status: StatusCode, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal server error")]
    Internal,
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<ValidationIssue>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            Self::NotFound => (StatusCode::NOT_FOUND, Vec::new()),
            Self::Validation(issues) => (StatusCode::BAD_REQUEST, issues.clone()),
            Self::InvalidBody { status, .. } => (*status, Vec::new()),
            Self::Internal => (StatusCode::INTERNAL_SERVER_ERROR, Vec::new()),
            Self::Database(e) => {
                error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
            },
        };
        let body = ErrorBody {
            // Database details stay in the log.
            error: match &self {
                Self::Database(_) => "internal server error".to_string(),
                other => other.to_string(),
            },
            details,
        };
        (status, Json(body)).into_response()
    }
}
