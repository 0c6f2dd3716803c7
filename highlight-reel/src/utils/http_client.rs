use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use tracing::debug;

use crate::Result;

/// Browser user agent; the clip provider rejects unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PROVIDER_REFERER: &str = "https://www.nba.com/";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client for the clip provider's JSON API.
///
/// `request_timeout` bounds each whole request; zero disables it.
pub fn build_provider_client(request_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(REFERER, HeaderValue::from_static(PROVIDER_REFERER));

    let mut builder = reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .default_headers(headers)
        .gzip(true)
        .deflate(true);
    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }
    Ok(builder.build()?)
}

/// Client for clip downloads. Timeouts are applied per request by the caller.
pub fn build_download_client(pool_max_idle_per_host: usize) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder().user_agent(BROWSER_USER_AGENT);
    if pool_max_idle_per_host > 0 {
        builder = builder.pool_max_idle_per_host(pool_max_idle_per_host);
    }
    Ok(builder.build()?)
}
