use stevedore_store::StoreError;

/// Operation errors, shaped so the wire layer can map each to the ECS
/// error name and HTTP status it expects.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    #[error("{0}")]
    InvalidParameter(String),

    #[error("cluster not found")]
    ClusterNotFound,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EcsError {
    /// The `__type` value on the JSON wire.
    pub fn wire_code(&self) -> &'static str {
        match self {
            EcsError::InvalidParameter(_) => "InvalidParameterException",
            EcsError::ClusterNotFound => "ClusterNotFoundException",
            EcsError::NotFound(_) => "ClientException",
            EcsError::Conflict(_) => "ClientException",
            EcsError::FailedPrecondition(_) => "ClientException",
            EcsError::NotImplemented(_) => "InvalidAction",
            EcsError::Unavailable(_) => "ServerException",
            EcsError::Internal(_) => "ServerException",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EcsError::Unavailable(_) => 503,
            EcsError::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<StoreError> for EcsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => EcsError::NotFound(format!("{} not found", what)),
            StoreError::Conflict(what) => EcsError::Conflict(format!("{} already exists", what)),
            // Callers retry stale versions; one that escapes is a server bug.
            StoreError::StaleVersion(what) => {
                EcsError::Internal(format!("unresolved write conflict on {}", what))
            }
            StoreError::InvalidArgument(msg) => EcsError::InvalidParameter(msg),
            StoreError::Internal(e) => EcsError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EcsError>;
