//! GitHub App authentication.
//!
//! Generates short-lived RS256 JWTs from the App's private key, exchanges
//! them for installation access tokens, and caches tokens per installation.
//! Also resolves which installation a repository belongs to.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SentinelError, SentinelResult};

/// Tokens are refreshed when closer than this to expiry.
const TOKEN_EXPIRY_BUFFER_MINS: i64 = 5;

#[derive(Debug, Serialize)]
struct AppClaims {
    /// Issued-at, backdated 60s to absorb clock drift.
    iat: i64,
    /// Expiry, at most 10 minutes out per GitHub's limit.
    exp: i64,
    /// App ID.
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositories {
    repositories: Vec<InstallationRepository>,
}

#[derive(Debug, Deserialize)]
struct InstallationRepository {
    full_name: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Utc::now() + Duration::minutes(TOKEN_EXPIRY_BUFFER_MINS) < self.expires_at
    }
}

/// App health probe result for the health endpoint.
#[derive(Debug, Serialize)]
pub struct AppHealth {
    /// App ID the probe ran as.
    pub app_id: u64,
    /// Installations a token could be minted for.
    pub reachable_installations: usize,
    /// Total configured installations.
    pub configured_installations: usize,
}

/// GitHub App credential manager.
pub struct GitHubApp {
    app_id: u64,
    encoding_key: EncodingKey,
    client: reqwest::Client,
    api_base: String,
    installation_ids: Vec<u64>,
    tokens: Mutex<HashMap<u64, CachedToken>>,
    repo_installations: Mutex<HashMap<String, u64>>,
}

impl GitHubApp {
    /// Load the App's private key and build the credential manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be read or is not valid
    /// RSA PEM.
    pub fn from_key_file(
        app_id: u64,
        key_path: &Path,
        installation_ids: Vec<u64>,
        api_base: &str,
    ) -> SentinelResult<Self> {
        let pem = std::fs::read(key_path)?;
        let encoding_key = EncodingKey::from_rsa_pem(&pem)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("sentinel/0.3"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(SentinelError::Http)?;

        Ok(Self {
            app_id,
            encoding_key,
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            installation_ids,
            tokens: Mutex::new(HashMap::new()),
            repo_installations: Mutex::new(HashMap::new()),
        })
    }

    /// Generate a short-lived App JWT.
    fn generate_jwt(&self) -> SentinelResult<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 600,
            iss: self.app_id.to_string(),
        };
        Ok(encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Get a valid access token for an installation, minting one if the
    /// cached token is missing or near expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if JWT signing or the token exchange fails.
    pub async fn installation_token(&self, installation_id: u64) -> SentinelResult<String> {
        {
            let tokens = self.tokens.lock().await;
            if let Some(cached) = tokens.get(&installation_id) {
                if cached.is_fresh() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_base
        );

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {jwt}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => SentinelError::Authentication {
                    reason: format!("installation token exchange rejected: {status} - {body}"),
                },
                404 => SentinelError::NotFound {
                    resource: format!("installation {installation_id}"),
                },
                _ => SentinelError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        let token_response: AccessTokenResponse = response.json().await?;

        debug!(
            installation_id = installation_id,
            expires_at = %token_response.expires_at,
            "Minted installation access token"
        );

        let mut tokens = self.tokens.lock().await;
        tokens.insert(
            installation_id,
            CachedToken {
                token: token_response.token.clone(),
                expires_at: token_response.expires_at,
            },
        );

        Ok(token_response.token)
    }

    /// Resolve a token for a repository, discovering its installation on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no configured installation can access the
    /// repository.
    pub async fn token_for_repository(&self, repository: &str) -> SentinelResult<String> {
        let installation_id = self.find_installation(repository).await?;
        self.installation_token(installation_id).await
    }

    /// Find which configured installation grants access to a repository.
    async fn find_installation(&self, repository: &str) -> SentinelResult<u64> {
        {
            let cache = self.repo_installations.lock().await;
            if let Some(id) = cache.get(repository) {
                return Ok(*id);
            }
        }

        for &installation_id in &self.installation_ids {
            let token = match self.installation_token(installation_id).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(
                        installation_id = installation_id,
                        error = %e,
                        "Skipping installation that failed token exchange"
                    );
                    continue;
                }
            };

            match self.list_installation_repositories(&token).await {
                Ok(repos) => {
                    if repos.iter().any(|r| r == repository) {
                        info!(
                            repository = %repository,
                            installation_id = installation_id,
                            "Resolved repository installation"
                        );
                        let mut cache = self.repo_installations.lock().await;
                        cache.insert(repository.to_string(), installation_id);
                        return Ok(installation_id);
                    }
                }
                Err(e) => {
                    warn!(
                        installation_id = installation_id,
                        error = %e,
                        "Failed to list installation repositories"
                    );
                }
            }
        }

        Err(SentinelError::NotFound {
            resource: format!("installation with access to {repository}"),
        })
    }

    async fn list_installation_repositories(&self, token: &str) -> SentinelResult<Vec<String>> {
        let url = format!("{}/installation/repositories?per_page=100", self.api_base);

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentinelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let listing: InstallationRepositories = response.json().await?;
        Ok(listing
            .repositories
            .into_iter()
            .map(|r| r.full_name)
            .collect())
    }

    /// Exercise JWT signing and token exchange for the health endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error only when the JWT itself cannot be produced;
    /// unreachable installations are reported in the count.
    pub async fn check_health(&self) -> SentinelResult<AppHealth> {
        self.generate_jwt()?;

        let mut reachable = 0;
        for &installation_id in &self.installation_ids {
            if self.installation_token(installation_id).await.is_ok() {
                reachable += 1;
            }
        }

        Ok(AppHealth {
            app_id: self.app_id,
            reachable_installations: reachable,
            configured_installations: self.installation_ids.len(),
        })
    }
}
