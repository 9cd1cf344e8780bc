// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley Contributors

//! HTTP client for the Parley account endpoints.

use anyhow::{anyhow, bail, Context, Result};
use parley_core::{IdentityId, Profile};
use serde::{Deserialize, Serialize};

/// Successful `/register` or `/sign-in` response.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    #[serde(rename = "userID")]
    pub user_id: IdentityId,
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

#[derive(Serialize)]
struct SignInRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Client for one Parley server.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a new account.
    pub async fn register(&self, profile: &Profile) -> Result<AuthResponse> {
        let response = self
            .client
            .post(format!("{}/register", self.base_url))
            .json(profile)
            .send()
            .await
            .context("Failed to reach server")?;
        parse_response(response).await
    }

    /// Check credentials before opening a session.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let response = self
            .client
            .post(format!("{}/sign-in", self.base_url))
            .json(&SignInRequest { username, password })
            .send()
            .await
            .context("Failed to reach server")?;
        parse_response(response).await
    }

    /// WebSocket URL of the session endpoint.
    pub fn ws_url(&self) -> Result<String> {
        ws_url(&self.base_url)
    }
}

async fn parse_response(response: reqwest::Response) -> Result<AuthResponse> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<AuthResponse>()
            .await
            .context("Invalid response from server");
    }

    match response.json::<ErrorBody>().await {
        Ok(body) => bail!("{} ({}): {}", status, body.error, body.message),
        Err(_) => Err(anyhow!("Server returned {}", status)),
    }
}

fn ws_url(base_url: &str) -> Result<String> {
    let rest = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        bail!("Server URL must start with http:// or https://: {}", base_url);
    };
    Ok(format!("{}/ws", rest.trim_end_matches('/')))
}
