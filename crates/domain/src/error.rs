/// Shared error type used across the gateway and its storage layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("user inactive")]
    UserInactive,

    #[error("policy missing")]
    PolicyMissing,

    #[error("daily token limit exceeded")]
    DailyExceeded,

    #[error("monthly token limit exceeded")]
    MonthlyExceeded,

    #[error("model not allowed by policy")]
    ModelNotAllowed,

    #[error("unauthorized admin request")]
    UnauthorizedAdmin,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable tag, matching the error kinds enumerated in
    /// the design notes (`CONFIG_MISSING`, `DAILY_EXCEEDED`, ...).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_MISSING",
            Error::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Error::UserInactive => "USER_INACTIVE",
            Error::PolicyMissing => "POLICY_MISSING",
            Error::DailyExceeded => "DAILY_EXCEEDED",
            Error::MonthlyExceeded => "MONTHLY_EXCEEDED",
            Error::ModelNotAllowed => "MODEL_NOT_ALLOWED",
            Error::UnauthorizedAdmin => "UNAUTHORIZED_ADMIN",
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::Storage(_) => "INTERNAL",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Human-readable reason surfaced to the client on a policy denial
    /// (e.g. `{"error": "Daily token limit exceeded"}`).
    pub fn human_reason(&self) -> String {
        match self {
            Error::UserInactive => "User is not active".to_string(),
            Error::PolicyMissing => "No policy found for user".to_string(),
            Error::DailyExceeded => "Daily token limit exceeded".to_string(),
            Error::MonthlyExceeded => "Monthly token limit exceeded".to_string(),
            Error::ModelNotAllowed => "Model not allowed by policy".to_string(),
            other => other.to_string(),
        }
    }
}
