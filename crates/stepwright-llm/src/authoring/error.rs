use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthoringError {
    /// Provider, network or transport failure. Never retried here.
    #[error("LLM request failed")]
    RequestFailed(#[source] anyhow::Error),

    #[error("LLM returned no content for {stage}")]
    EmptyResponse { stage: &'static str },

    #[error("Could not parse {stage} output")]
    Unparseable { stage: &'static str },

    #[error("Malformed tool call '{name}': {reason}")]
    MalformedToolCall { name: String, reason: String },
}
