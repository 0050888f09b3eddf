use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Finalizer Error: {0}")]
    // boxed because `finalizer::Error` embeds the reconciler error, which is this type
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Missing Secret Error: {0}")]
    MissingSecretError(String),

    #[error("Replication Error: {0}")]
    ReplicationError(#[from] crate::replication::ReplicationError),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Cron parse error: {0}")]
    CronParseError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}
