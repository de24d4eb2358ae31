//! Typed client for the daemon's own endpoints, used by the CLI.

#[allow(clippy::module_inception)]
mod client;
mod error;

use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

pub use client::ApiClient;
pub use error::ApiError;

/// A request the [`ApiClient`] knows how to send and decode.
pub trait ApiRequest {
    type Response: DeserializeOwned;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder;
}

/// `base_url` with its path replaced by `path`.
pub fn endpoint(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    url.set_path(path);
    url.set_query(None);
    url
}
