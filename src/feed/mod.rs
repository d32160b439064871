use reqwest::Client;
use std::time::Duration;

use crate::error::FetchError;

pub mod pool;
pub mod price;

pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("poolwatch/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// GET a URL and return the body, treating any non-2xx status as a failure.
pub(crate) async fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(resp.text().await?)
}
