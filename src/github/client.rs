//! GH Client Pool (spec §4.2): one authenticated, caching `Octocrab`
//! client per installation ID, with ID 0 meaning "App-level".
//!
//! Grounded on the teacher's `GitHubClient` (App JWT signing +
//! installation-token caching with a 5-minute expiry buffer), generalized
//! from a bare token cache into a full per-installation client pool that
//! also carries the shared response cache (spec §3 `ResponseCache`).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use octocrab::Octocrab;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::github::cache::ResponseCache;

/// An authenticated client for one installation, plus the token's expiry
/// so the pool knows when to refresh it.
pub struct PoolEntry {
    pub client: Octocrab,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

pub struct GhClientPool {
    app_id: i64,
    private_key_pem: Vec<u8>,
    ghe_url: Option<String>,
    cache: Arc<ResponseCache>,
    entries: RwLock<HashMap<i64, Arc<PoolEntry>>>,
}

impl GhClientPool {
    pub fn new(app_id: i64, private_key_pem: Vec<u8>, ghe_url: Option<String>) -> Result<Self> {
        // Fail fast at construction if the key can't even be parsed.
        EncodingKey::from_rsa_pem(&private_key_pem)
            .map_err(|e| EngineError::Configuration(format!("invalid App private key: {e}")))?;

        Ok(Self {
            app_id,
            private_key_pem,
            ghe_url,
            cache: Arc::new(ResponseCache::new()),
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn cache(&self) -> Arc<ResponseCache> {
        self.cache.clone()
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            iat: now - 60, // tolerate clock drift
            exp: now + (9 * 60),
            iss: self.app_id.to_string(),
        };
        let key = EncodingKey::from_rsa_pem(&self.private_key_pem)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| EngineError::Configuration(e.to_string()))
    }

    fn builder(&self) -> octocrab::OctocrabBuilder {
        let mut builder = Octocrab::builder();
        if let Some(base) = &self.ghe_url {
            let trimmed = base.trim_end_matches('/');
            if let Ok(url) = format!("{trimmed}/api/v3/").parse() {
                builder = builder.base_uri(url).expect("valid GHE base URI");
            }
        }
        builder
    }

    async fn build_app_client(&self) -> Result<Octocrab> {
        let jwt = self.app_jwt()?;
        self.builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| EngineError::TransientForge(e.into()))
    }

    async fn fetch_installation_token(
        &self,
        installation_id: i64,
    ) -> Result<(String, Option<DateTime<Utc>>)> {
        let app_client = self.build_app_client().await?;
        let response: serde_json::Value = app_client
            .post(
                format!("/app/installations/{installation_id}/access_tokens"),
                None::<&()>,
            )
            .await
            .map_err(|e| EngineError::TransientForge(e.into()))?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| EngineError::TransientForge(anyhow::anyhow!("no token in response")))?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok((token, expires_at))
    }

    /// Returns the memoized client for `installation_id` (0 = App-level),
    /// authenticating and caching it on first call.
    pub async fn get(&self, installation_id: i64) -> Result<Arc<PoolEntry>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&installation_id) {
                let stale = entry
                    .expires_at
                    .is_some_and(|exp| exp <= Utc::now() + chrono::Duration::minutes(5));
                if !stale {
                    return Ok(entry.clone());
                }
            }
        }

        let entry = if installation_id == 0 {
            Arc::new(PoolEntry {
                client: self.build_app_client().await?,
                expires_at: None,
            })
        } else {
            let (token, expires_at) = self.fetch_installation_token(installation_id).await?;
            let client = self
                .builder()
                .personal_token(token)
                .build()
                .map_err(|e| EngineError::TransientForge(e.into()))?;
            Arc::new(PoolEntry { client, expires_at })
        };

        let mut entries = self.entries.write().await;
        entries.insert(installation_id, entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_private_key_at_construction() {
        let result = GhClientPool::new(1, b"not a pem".to_vec(), None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn memoized_entry_is_reused_without_refetch() {
        // Exercise the memoization path directly: seed the map with a
        // fresh, non-expiring entry and confirm `get` hands back the same
        // Arc rather than re-authenticating (spec §8: "get(installationId)
        // returns the same client object for repeated calls").
        let pool = GhClientPool {
            app_id: 1,
            private_key_pem: b"unused".to_vec(),
            ghe_url: None,
            cache: Arc::new(ResponseCache::new()),
            entries: RwLock::new(HashMap::new()),
        };

        let seeded = Arc::new(PoolEntry {
            client: Octocrab::builder().build().unwrap(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        });
        pool.entries.write().await.insert(7, seeded.clone());

        let first = pool.get(7).await.unwrap();
        let second = pool.get(7).await.unwrap();
        assert!(Arc::ptr_eq(&first, &seeded));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
