use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use super::get_text;
use crate::error::FetchError;
use crate::poller::SampleSource;

/// One BTC/USD quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    pub change_24h: f64,
    pub timestamp: DateTime<Utc>,
}

// CoinGecko simple price response types
#[derive(Deserialize, Debug)]
struct CoinGeckoQuote {
    usd: f64,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct CoinGeckoResponse {
    bitcoin: Option<CoinGeckoQuote>,
}

pub fn price_url(api_base: &str) -> Result<Url, url::ParseError> {
    Url::parse_with_params(
        &format!("{}/simple/price", api_base.trim_end_matches('/')),
        &[
            ("ids", "bitcoin"),
            ("vs_currencies", "usd"),
            ("include_24hr_change", "true"),
        ],
    )
}

pub fn parse_price_response(body: &str, now: DateTime<Utc>) -> Result<PriceSample, FetchError> {
    let resp: CoinGeckoResponse = serde_json::from_str(body)?;
    let quote = resp
        .bitcoin
        .ok_or_else(|| FetchError::Malformed("missing bitcoin key".to_string()))?;
    if !quote.usd.is_finite() {
        return Err(FetchError::Malformed(format!("non-finite price {}", quote.usd)));
    }
    Ok(PriceSample {
        price: quote.usd,
        change_24h: quote.usd_24h_change.filter(|c| c.is_finite()).unwrap_or(0.0),
        timestamp: now,
    })
}

pub struct PriceFeed {
    client: Client,
    url: Url,
}

impl PriceFeed {
    pub fn new(client: Client, api_base: &str) -> Result<Self, url::ParseError> {
        Ok(Self { client, url: price_url(api_base)? })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl SampleSource for PriceFeed {
    type Sample = PriceSample;

    fn name(&self) -> &'static str {
        "price"
    }

    fn metric(sample: &PriceSample) -> f64 {
        sample.price
    }

    async fn fetch(&self) -> Result<PriceSample, FetchError> {
        let body = get_text(&self.client, self.url.as_str()).await?;
        parse_price_response(&body, Utc::now())
    }
}
