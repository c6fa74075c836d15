//! LLM Provider implementations for OpenOrca.
//!
//! All providers implement the `openorca_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use openorca_config::ProviderConfig;
use openorca_core::error::ProviderError;
use openorca_core::Provider;
use std::sync::Arc;

/// Build the configured provider.
pub fn build_from_config(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config.api_key.clone().unwrap_or_else(|| "not-needed".into());
    let provider = OpenAiCompatProvider::new(&config.name, &config.api_url, api_key)?;
    tracing::debug!(
        provider = %config.name,
        url = %provider.base_url(),
        model = %config.model,
        "Provider configured"
    );
    Ok(Arc::new(provider))
}
