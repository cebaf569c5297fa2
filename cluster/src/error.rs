#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cluster API call failed: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("bad request: {0}")]
    UserInput(String),

    #[error("could not serialise resource: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("context cancelled")]
    Cancelled,
}
