use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::Deserialize;

pub(crate) fn build_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")
}

pub(crate) fn checked_url(url: impl Into<String>, what: &str) -> anyhow::Result<String> {
    let url = url.into().trim().to_string();
    if url.is_empty() {
        anyhow::bail!("{what} URL cannot be empty");
    }
    Ok(url)
}

pub(crate) async fn decode_response<T: for<'de> Deserialize<'de>>(
    resp: reqwest::Response,
    action: &str,
) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .with_context(|| format!("decode {action} response"));
    }

    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::NOT_FOUND {
        anyhow::bail!("{action} failed: {status} (not found)");
    }
    if body.is_empty() {
        anyhow::bail!("{action} failed: {status}");
    }
    anyhow::bail!("{action} failed: {status} {body}");
}
