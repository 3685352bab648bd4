use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Graph construction errors
    #[error("duplicate step: {0}")]
    DuplicateStep(String),

    #[error("unknown step: {0}")]
    UnknownStep(String),

    #[error("step '{0}' already has an outgoing edge")]
    DuplicateEdge(String),

    // Run-time graph errors
    #[error("no route mapped for '{label}' out of step '{step}'")]
    Routing { step: String, label: String },

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // Capability errors
    #[error("generation request failed: {0}")]
    Generation(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;
