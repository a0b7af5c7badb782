// Initial item load over the HTTP API.

use thiserror::Error;
use tracing::debug;

use crate::protocol::{Item, ItemsPayload};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("failed to decode items from {url}: {source}")]
    Decode { url: String, source: reqwest::Error },
}

/// Fetch the full item collection once at startup: `GET {api_url}/api/items`
/// returning `{"items": [...]}`.
pub async fn fetch_items(api_url: &str) -> Result<Vec<Item>, FetchError> {
    let url = format!("{}/api/items", api_url.trim_end_matches('/'));
    debug!("fetching initial items from {url}");

    let response = reqwest::get(&url)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|source| FetchError::Request {
            url: url.clone(),
            source,
        })?;

    let payload: ItemsPayload = response
        .json()
        .await
        .map_err(|source| FetchError::Decode { url, source })?;

    Ok(payload.items)
}
