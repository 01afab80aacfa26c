pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{ListingDetail, ListingDetailInput, RunData, StartUrl};

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Default actor for listing detail pages (photos, facts, street view fallback).
pub const LISTING_DETAIL_SCRAPER: &str = "maxcopell~zillow-detail-scraper";

/// Each poll long-waits up to 60s server side, so this bounds a run at ~10 minutes.
const MAX_POLLS: u32 = 10;

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
    listing_actor: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        // Long-poll requests hold the connection for up to 60s.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self {
            client,
            token,
            base_url: BASE_URL.to_string(),
            listing_actor: LISTING_DETAIL_SCRAPER.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_listing_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.listing_actor = actor_id.into();
        self
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let request = self.client.post(&url).bearer_auth(&self.token).json(input);
        let envelope: ApiResponse<RunData> = Self::send_json(request).await?;
        Ok(envelope.data)
    }

    /// Poll until a run completes. Each poll long-waits server side
    /// (`waitForFinish=60`), so no client-side sleep is needed between polls.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
        let mut last_status = String::new();

        for poll in 1..=MAX_POLLS {
            let request = self.client.get(&url).bearer_auth(&self.token);
            let run = Self::send_json::<ApiResponse<RunData>>(request).await?.data;

            match run.status.as_str() {
                "SUCCEEDED" => return Ok(run),
                "FAILED" | "ABORTED" | "TIMED-OUT" => return Err(ApifyError::RunFailed(run.status)),
                other => {
                    tracing::debug!(run_id, poll, status = other, "Run still in progress");
                    last_status = run.status;
                }
            }
        }

        Err(ApifyError::PollLimit {
            run_id: run_id.to_string(),
            status: last_status,
            polls: MAX_POLLS,
        })
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json&clean=true", self.base_url, dataset_id);
        Self::send_json(self.client.get(&url).bearer_auth(&self.token)).await
    }

    async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApifyError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Scrape one listing end-to-end: start run, poll, fetch results.
    pub async fn scrape_listing_details(
        &self,
        listing_url: Option<&str>,
        address: &str,
    ) -> Result<Vec<ListingDetail>> {
        tracing::info!(address, listing_url, "Starting listing detail scrape");

        let input = ListingDetailInput::for_listing(listing_url, address);
        let run = self.start_run(&self.listing_actor, &input).await?;
        tracing::debug!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::debug!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, fetching results"
        );

        let details: Vec<ListingDetail> = self
            .get_dataset_items(&completed.default_dataset_id)
            .await?;
        tracing::info!(count = details.len(), "Fetched listing details");

        Ok(details)
    }

    /// All photo URLs for a listing, unfiltered.
    pub async fn listing_photo_urls(
        &self,
        listing_url: Option<&str>,
        address: &str,
    ) -> Result<Vec<String>> {
        let details = self.scrape_listing_details(listing_url, address).await?;
        Ok(details.iter().flat_map(ListingDetail::photo_urls).collect())
    }
}
