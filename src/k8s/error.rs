use thiserror::Error;

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
pub enum K8sError {
    /// Failed to create or initialize Kubernetes client
    #[error("failed to initialize Kubernetes client: {0}")]
    ClientInitialization(#[source] Box<kube::Error>),
}

impl K8sError {
    /// Create a client initialization error
    pub fn client_initialization(source: kube::Error) -> Self {
        Self::ClientInitialization(Box::new(source))
    }
}
