/// Errors that abort a conversion.
///
/// A missing or unreadable index is not here: it degrades to conversion
/// without retrieval (see [`crate::index::IndexLoad`]).
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("unsupported pitch method `{0}`")]
    UnsupportedMethod(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{stage} failed")]
    Inference {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage}: expected {expected}, got {actual}")]
    ShapeMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("conversion cancelled")]
    Cancelled,
}

impl ConversionError {
    pub(crate) fn inference(stage: &'static str, source: anyhow::Error) -> Self {
        Self::Inference { stage, source }
    }
}
