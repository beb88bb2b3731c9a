//! Droplet identity bootstrap.
//!
//! Reads the host ID, region and a one-shot auth token from the metadata
//! service, then exchanges the token for a durable application key.

use super::BootstrapError;
use reqwest::header::AUTHORIZATION;
use tracing::debug;

/// Identity of an untrusted (droplet) client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletIdentity {
    pub host_id: String,
    pub region: String,
    pub app_key: String,
}

/// Identity of a trusted application, provisioned out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedApp {
    pub name: String,
    pub key: String,
}

pub async fn bootstrap(
    http: &reqwest::Client,
    metadata_endpoint: &str,
    auth_endpoint: &str,
) -> Result<DropletIdentity, BootstrapError> {
    let host_id = http_get(http, &format!("{}/v1/id", metadata_endpoint), None).await?;
    if host_id.is_empty() {
        return Err(BootstrapError::Empty("host id"));
    }
    debug!("host ID: {}", host_id);

    let region = http_get(http, &format!("{}/v1/region", metadata_endpoint), None).await?;
    debug!("region: {}", region);

    let token = http_get(http, &format!("{}/v1/auth-token", metadata_endpoint), None).await?;
    if token.is_empty() {
        return Err(BootstrapError::Empty("auth token"));
    }
    debug!("auth token: {}", truncate(&token));

    let body = http_get(
        http,
        &format!("{}/v1/appkey/droplet-auth-token", auth_endpoint),
        Some(&token),
    )
    .await?;
    let app_key: String = serde_json::from_str(&body)?;
    debug!("appkey: {}", truncate(&app_key));

    Ok(DropletIdentity {
        host_id,
        region,
        app_key,
    })
}

async fn http_get(
    http: &reqwest::Client,
    url: &str,
    auth_token: Option<&str>,
) -> Result<String, BootstrapError> {
    debug!("HTTP GET {}", url);
    let mut req = http.get(url);
    if let Some(token) = auth_token {
        req = req.header(AUTHORIZATION, format!("DOMETADATA {}", token));
    }

    let request_err = |source| BootstrapError::Request {
        url: url.to_string(),
        source,
    };
    let resp = req.send().await.map_err(request_err)?;

    let status = resp.status();
    if !status.is_success() {
        debug!(
            "got status code {} while fetching {} (auth token: {})",
            status,
            url,
            truncate(auth_token.unwrap_or_default())
        );
        return Err(BootstrapError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = resp.text().await.map_err(request_err)?;
    Ok(body.trim().to_string())
}

/// Masks a secret for logging, keeping only its first four characters.
pub fn truncate(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_masks_secrets() {
        assert_eq!(truncate("abcdefghij"), "abcd...");
        assert_eq!(truncate("ab"), "ab...");
    }
}
