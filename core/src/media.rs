use std::sync::OnceLock;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use regex::Regex;

use crate::errors::WhitetailError;

/// An image attachment split out of a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload exactly as received.
    pub data: String,
    pub data_url: String,
}

fn data_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:(image/[^;]+);base64,(.*)$").expect("static data URL pattern")
    })
}

/// Parse `data:image/<type>;base64,<payload>`. The payload must decode.
pub fn parse_data_url(data_url: &str) -> Result<InlineImage> {
    let captures = data_url_pattern()
        .captures(data_url.trim())
        .ok_or(WhitetailError::InvalidImage)?;
    let mime_type = captures[1].to_string();
    let data = captures[2].to_string();
    if data.is_empty() || B64_ENGINE.decode(data.as_bytes()).is_err() {
        return Err(WhitetailError::InvalidImage.into());
    }
    Ok(InlineImage {
        mime_type,
        data,
        data_url: data_url.trim().to_string(),
    })
}

/// Build a data URL from raw bytes.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", B64_ENGINE.encode(bytes))
}
