#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("storage error: {source}")]
    Store {
        #[from]
        source: stevedore_store::StoreError,
    },

    #[error("Kubernetes is unavailable: {0}")]
    Unavailable(String),

    #[error("conversion failed: {0}")]
    Convert(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
