use thiserror::Error;

use crate::models::Provider;

#[derive(Debug, Error)]
pub enum WhitetailError {
    #[error("Missing {} API key", provider.label())] MissingApiKey { provider: Provider },
    #[error("{} is not enabled in this deployment", provider.label())] ProviderUnavailable { provider: Provider },
    #[error("{} request failed ({status}): {body}", provider.label())] Transport { provider: Provider, status: u16, body: String },
    #[error("Invalid base64 image data. Expected a data URL.")] InvalidImage,
    #[error("Model returned an empty response.")] EmptyResponse,
    #[error("Model returned an unexpected format.")] UnexpectedFormat,
    #[error("Model returned an invalid prediction payload.")] InvalidPrediction,
    #[error("Unknown provider: {0}")] UnknownProvider(String),
}

impl WhitetailError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "CFG-1001",
            Self::ProviderUnavailable { .. } => "CFG-1002",
            Self::UnknownProvider(_) => "CFG-1003",
            Self::Transport { .. } => "AI-1001",
            Self::EmptyResponse => "AI-1002",
            Self::UnexpectedFormat => "AI-1003",
            Self::InvalidPrediction => "AI-1004",
            Self::InvalidImage => "IMG-1001",
        }
    }
    pub fn explain(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "No API key was found in any of the recognised environment variables.",
            Self::ProviderUnavailable { .. } => "The provider is not part of the configured allow-list.",
            Self::UnknownProvider(_) => "Only gemini, openai and claude are recognised.",
            Self::Transport { .. } => "The provider answered with a non-success HTTP status.",
            Self::EmptyResponse => "The provider returned no text where JSON was expected.",
            Self::UnexpectedFormat => "The provider output could not be parsed as JSON.",
            Self::InvalidPrediction => "The prediction JSON was missing fields or had the wrong types.",
            Self::InvalidImage => "Images must be data URLs of the form data:image/<type>;base64,<payload>.",
        }
    }
}

/// Return the catalogue entry carried by an `anyhow` error, if any.
pub fn catalogue(err: &anyhow::Error) -> Option<&WhitetailError> {
    err.downcast_ref::<WhitetailError>()
}
