use stevedore_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ElbError {
    #[error("{0}")]
    Validation(String),

    #[error("load balancer {0} already exists")]
    DuplicateLoadBalancerName(String),

    #[error("target group {0} already exists")]
    DuplicateTargetGroupName(String),

    #[error("load balancer {0} not found")]
    LoadBalancerNotFound(String),

    #[error("target group {0} not found")]
    TargetGroupNotFound(String),

    #[error("listener {0} not found")]
    ListenerNotFound(String),

    #[error("rule {0} not found")]
    RuleNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ElbError {
    /// The `<Code>` element of the XML error envelope.
    pub fn wire_code(&self) -> &'static str {
        match self {
            ElbError::Validation(_) => "ValidationError",
            ElbError::DuplicateLoadBalancerName(_) => "DuplicateLoadBalancerName",
            ElbError::DuplicateTargetGroupName(_) => "DuplicateTargetGroupName",
            ElbError::LoadBalancerNotFound(_) => "LoadBalancerNotFound",
            ElbError::TargetGroupNotFound(_) => "TargetGroupNotFound",
            ElbError::ListenerNotFound(_) => "ListenerNotFound",
            ElbError::RuleNotFound(_) => "RuleNotFound",
            ElbError::Internal(_) => "InternalFailure",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ElbError::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<StoreError> for ElbError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ElbError::Validation(format!("{} not found", what)),
            StoreError::Conflict(what) => ElbError::Validation(format!("{} already exists", what)),
            StoreError::InvalidArgument(msg) => ElbError::Validation(msg),
            StoreError::StaleVersion(what) => {
                ElbError::Internal(format!("unresolved write conflict on {}", what))
            }
            StoreError::Internal(e) => ElbError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ElbError>;
