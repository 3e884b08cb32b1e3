//! GraphClient: concrete ad platform adapter for the Meta Marketing (Graph)
//! API.
//!
//! Implements every capability trait from `adflow_core::platform`. Entities
//! are created under `act_<account>`; deletion sets `status = DELETED`;
//! images are uploaded as base64 bytes and videos by URL.
//!
//! The access token is wrapped in [`secrecy::SecretString`], held behind a
//! lock so `refresh_credentials` can swap it, and never logged.

use std::time::Duration;

use adflow_core::platform::{
    AssetUploader, CredentialRefresher, EntityCreator, EntityDeleter, EntityPayload, EntityReader,
    EntityUpdater, InsightsPage, InsightsQuery,
};
use adflow_types::config::PlatformConfig;
use adflow_types::error::PlatformError;
use adflow_types::workflow::{AssetHandle, AssetKind, AssetSpec, DateRange, EntityType};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::error::{classify_error, classify_transport, is_missing_object};

/// Environment variable holding the access token.
pub const ACCESS_TOKEN_ENV: &str = "ADFLOW_ACCESS_TOKEN";

/// Where a fresh token comes from on refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Re-read the named environment variable.
    Env(String),
    /// Fixed token; refresh keeps it.
    Static,
}

/// Graph API ad platform adapter.
///
/// Does not derive Debug: it holds the access token.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    ad_account_id: String,
    token: RwLock<SecretString>,
    token_source: TokenSource,
}

impl GraphClient {
    pub fn new(
        config: &PlatformConfig,
        ad_account_id: impl Into<String>,
        token: SecretString,
        token_source: TokenSource,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()?;

        let ad_account_id = ad_account_id.into();
        let ad_account_id = ad_account_id
            .strip_prefix("act_")
            .map(str::to_string)
            .unwrap_or(ad_account_id);

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ad_account_id,
            token: RwLock::new(token),
            token_source,
        })
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn account_path(&self, edge: &str) -> String {
        format!("act_{}/{edge}", self.ad_account_id)
    }

    /// Attach the token and send. Only transport failures are errors here.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<RawResponse, PlatformError> {
        let request = {
            let token = self.token.read().await;
            request.bearer_auth(token.expose_secret())
        };

        let response = request.send().await.map_err(|e| classify_transport(&e))?;
        let status = response.status().as_u16();
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body = response.text().await.map_err(|e| classify_transport(&e))?;

        Ok(RawResponse {
            status,
            body,
            retry_after_ms,
        })
    }

    /// Send and decode the JSON body; failures are classified into
    /// [`PlatformError`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, PlatformError> {
        self.execute(request).await?.into_json()
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        tracing::debug!(path, "graph POST");
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, PlatformError> {
        tracing::debug!(path, "graph GET");
        self.send(self.http.get(self.url(path)).query(query)).await
    }

    /// Load image bytes from a local path or a remote URL.
    async fn image_bytes(&self, asset: &AssetSpec) -> Result<Vec<u8>, PlatformError> {
        if let Some(path) = &asset.path {
            return tokio::fs::read(path)
                .await
                .map_err(|e| PlatformError::validation(format!("cannot read image '{path}': {e}")));
        }
        let Some(url) = &asset.url else {
            return Err(PlatformError::validation(format!(
                "asset '{}' has neither path nor url",
                asset.key
            )));
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_error(
                status.as_u16(),
                &format!("failed to download image from {url}"),
                None,
            ));
        }
        let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Request and response shapes
// ---------------------------------------------------------------------------

struct RawResponse {
    status: u16,
    body: String,
    retry_after_ms: Option<u64>,
}

impl RawResponse {
    fn into_json(self) -> Result<Value, PlatformError> {
        if !(200..300).contains(&self.status) {
            let err = classify_error(self.status, &self.body, self.retry_after_ms);
            tracing::debug!(status = self.status, error = %err, "graph request failed");
            return Err(err);
        }
        serde_json::from_str(&self.body)
            .map_err(|e| PlatformError::transient(format!("invalid response JSON: {e}")))
    }
}

/// Account edge that creates entities of `entity_type`.
fn create_edge(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Campaign => "campaigns",
        EntityType::AdSet => "adsets",
        EntityType::Creative => "adcreatives",
        EntityType::Ad => "ads",
    }
}

/// Field naming the parent entity, if the type has one.
fn parent_field(entity_type: EntityType) -> Option<&'static str> {
    match entity_type {
        EntityType::AdSet => Some("campaign_id"),
        EntityType::Ad => Some("adset_id"),
        EntityType::Campaign | EntityType::Creative => None,
    }
}

/// Request body for creating an entity: caller fields, then the parent id,
/// then resolved references. An ad's `creative_id` is wrapped as
/// `{"creative": {"creative_id": ...}}`.
pub fn create_body(
    entity_type: EntityType,
    payload: &EntityPayload,
    parent_id: Option<&str>,
) -> Map<String, Value> {
    let mut body = payload.fields.clone();

    if let (Some(field), Some(parent)) = (parent_field(entity_type), parent_id) {
        body.insert(field.to_string(), json!(parent));
    }

    for (field, external_id) in &payload.references {
        if entity_type == EntityType::Ad && field == "creative_id" {
            body.insert("creative".to_string(), json!({ "creative_id": external_id }));
        } else {
            body.insert(field.clone(), json!(external_id));
        }
    }
    body
}

/// Extract the image hash from an `adimages` response:
/// `{"images": {"<name>": {"hash": ..., "url": ...}}}`.
pub fn parse_image_upload(response: &Value) -> Option<AssetHandle> {
    let image = response.get("images")?.as_object()?.values().next()?;
    Some(AssetHandle {
        kind: AssetKind::Image,
        id: image.get("hash")?.as_str()?.to_string(),
        url: image.get("url").and_then(Value::as_str).map(str::to_string),
    })
}

fn id_of(response: &Value) -> Option<String> {
    match response.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Account checks
// ---------------------------------------------------------------------------

const AD_ACCOUNT_FIELDS: &str = "id,name,account_status,currency,timezone_name";

/// An ad account reachable with the current token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdAccount {
    /// `act_<id>`.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// 1 = active, 2 = disabled, 3 = unsettled, 101 = closed.
    #[serde(default)]
    pub account_status: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub timezone_name: Option<String>,
}

impl AdAccount {
    pub fn is_active(&self) -> bool {
        self.account_status == Some(1)
    }
}

/// Parse the `data` array of a `me/adaccounts` response.
pub fn parse_ad_accounts(response: &Value) -> Result<Vec<AdAccount>, PlatformError> {
    let data = response.get("data").cloned().unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(data)
        .map_err(|e| PlatformError::validation(format!("unexpected ad account listing: {e}")))
}

impl GraphClient {
    /// The configured ad account, as `act_<id>`.
    pub fn ad_account(&self) -> String {
        format!("act_{}", self.ad_account_id)
    }

    /// Make one cheap read under the configured ad account. Succeeds only if
    /// the token is valid and grants access to that account.
    ///
    /// Not retried: a failure is reported as-is for the caller to show.
    pub async fn validate_credentials(&self) -> Result<(), PlatformError> {
        self.get(
            &self.account_path("campaigns"),
            &[("fields", "id".to_string()), ("limit", "1".to_string())],
        )
        .await?;
        tracing::debug!(account = %self.ad_account(), "credentials accepted");
        Ok(())
    }

    /// Ad accounts the token can reach, first page only.
    pub async fn list_ad_accounts(&self) -> Result<Vec<AdAccount>, PlatformError> {
        let response = self
            .get(
                "me/adaccounts",
                &[
                    ("fields", AD_ACCOUNT_FIELDS.to_string()),
                    ("limit", "100".to_string()),
                ],
            )
            .await?;
        let accounts = parse_ad_accounts(&response)?;
        tracing::debug!(count = accounts.len(), "listed ad accounts");
        Ok(accounts)
    }
}

// ---------------------------------------------------------------------------
// Capability impls
// ---------------------------------------------------------------------------

impl EntityCreator for GraphClient {
    async fn create(
        &self,
        entity_type: EntityType,
        payload: &EntityPayload,
        parent_id: Option<&str>,
    ) -> Result<String, PlatformError> {
        let body = Value::Object(create_body(entity_type, payload, parent_id));
        let response = self
            .post(&self.account_path(create_edge(entity_type)), &body)
            .await?;

        let id = id_of(&response).ok_or_else(|| {
            PlatformError::validation(format!(
                "create {} returned no id: {response}",
                entity_type.as_str()
            ))
        })?;
        tracing::info!(entity_type = entity_type.as_str(), external_id = %id, "created entity");
        Ok(id)
    }
}

impl EntityUpdater for GraphClient {
    async fn update(
        &self,
        entity_type: EntityType,
        external_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<(), PlatformError> {
        self.post(external_id, &Value::Object(fields.clone())).await?;
        tracing::info!(entity_type = entity_type.as_str(), external_id, "updated entity");
        Ok(())
    }
}

impl EntityDeleter for GraphClient {
    async fn delete(&self, entity_type: EntityType, external_id: &str) -> Result<(), PlatformError> {
        self.post(external_id, &json!({ "status": "DELETED" })).await?;
        tracing::info!(entity_type = entity_type.as_str(), external_id, "deleted entity");
        Ok(())
    }
}

impl EntityReader for GraphClient {
    async fn exists(&self, _entity_type: EntityType, external_id: &str) -> Result<bool, PlatformError> {
        let request = self
            .http
            .get(self.url(external_id))
            .query(&[("fields", "id,status")]);

        let raw = self.execute(request).await?;
        if is_missing_object(raw.status, &raw.body) {
            return Ok(false);
        }
        let object = raw.into_json()?;
        Ok(object.get("status").and_then(Value::as_str) != Some("DELETED"))
    }
}

impl AssetUploader for GraphClient {
    async fn upload(&self, asset: &AssetSpec) -> Result<AssetHandle, PlatformError> {
        match asset.kind {
            AssetKind::Image => {
                let bytes = self.image_bytes(asset).await?;
                let mut body = json!({ "bytes": BASE64.encode(&bytes) });
                if let Some(name) = &asset.name {
                    body["name"] = json!(name);
                }
                let response = self.post(&self.account_path("adimages"), &body).await?;
                let handle = parse_image_upload(&response).ok_or_else(|| {
                    PlatformError::validation(format!("image upload returned no hash: {response}"))
                })?;
                tracing::info!(asset = %asset.key, hash = %handle.id, "uploaded image");
                Ok(handle)
            }
            AssetKind::Video => {
                let Some(url) = &asset.url else {
                    return Err(PlatformError::validation(format!(
                        "video asset '{}' requires a url",
                        asset.key
                    )));
                };
                let mut body = json!({ "file_url": url });
                if let Some(name) = &asset.name {
                    body["name"] = json!(name);
                }
                let response = self.post(&self.account_path("advideos"), &body).await?;
                let id = id_of(&response).ok_or_else(|| {
                    PlatformError::validation(format!("video upload returned no id: {response}"))
                })?;
                tracing::info!(asset = %asset.key, video_id = %id, "uploaded video");
                Ok(AssetHandle {
                    kind: AssetKind::Video,
                    id,
                    url: Some(url.clone()),
                })
            }
        }
    }
}

impl InsightsQuery for GraphClient {
    async fn fetch(
        &self,
        entity_id: &str,
        date_range: &DateRange,
        metrics: &[String],
        cursor: Option<&str>,
    ) -> Result<InsightsPage, PlatformError> {
        // The cursor is the absolute `paging.next` URL, which already carries
        // the query parameters of the first request.
        let page = match cursor {
            Some(next) => {
                tracing::debug!(entity_id, "graph GET next insights page");
                self.send(self.http.get(next)).await?
            }
            None => {
                let time_range = json!({
                    "since": date_range.since.to_string(),
                    "until": date_range.until.to_string(),
                });
                self.get(
                    &format!("{entity_id}/insights"),
                    &[
                        ("fields", metrics.join(",")),
                        ("time_range", time_range.to_string()),
                    ],
                )
                .await?
            }
        };
        Ok(insights_page(&page))
    }
}

/// Split an insights response into its rows and the next-page cursor.
fn insights_page(body: &Value) -> InsightsPage {
    let rows = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let next = body
        .pointer("/paging/next")
        .and_then(Value::as_str)
        .map(str::to_string);
    tracing::debug!(rows = rows.len(), more = next.is_some(), "fetched insights page");
    InsightsPage { rows, next }
}

impl CredentialRefresher for GraphClient {
    async fn refresh_credentials(&self) -> Result<(), PlatformError> {
        match &self.token_source {
            TokenSource::Static => {
                tracing::debug!("static access token; nothing to refresh");
                Ok(())
            }
            TokenSource::Env(var) => {
                let fresh = std::env::var(var)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| PlatformError::auth(format!("{var} is not set")))?;
                *self.token.write().await = SecretString::from(fresh);
                tracing::info!("access token reloaded from {var}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn client(base_url: &str) -> GraphClient {
        let config = PlatformConfig {
            base_url: base_url.to_string(),
            ..PlatformConfig::default()
        };
        GraphClient::new(
            &config,
            "act_1234",
            SecretString::from("test-token-not-real"),
            TokenSource::Static,
        )
        .unwrap()
    }

    #[test]
    fn urls_are_built_under_the_account() {
        let client = client("https://graph.example/v21.0/");
        assert_eq!(client.ad_account_id, "1234");
        assert_eq!(
            client.url(&client.account_path("campaigns")),
            "https://graph.example/v21.0/act_1234/campaigns"
        );
        assert_eq!(client.url("/120200"), "https://graph.example/v21.0/120200");
    }

    #[test]
    fn ad_set_body_carries_campaign_id() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Prospecting"));
        fields.insert("daily_budget".into(), json!(5000));
        let payload = EntityPayload {
            fields,
            references: BTreeMap::new(),
        };

        let body = create_body(EntityType::AdSet, &payload, Some("120200000001"));
        assert_eq!(body["campaign_id"], "120200000001");
        assert_eq!(body["daily_budget"], 5000);
        assert_eq!(create_edge(EntityType::AdSet), "adsets");
    }

    #[test]
    fn ad_body_wraps_creative_reference() {
        let payload = EntityPayload {
            fields: Map::new(),
            references: BTreeMap::from([("creative_id".to_string(), "238000".to_string())]),
        };

        let body = create_body(EntityType::Ad, &payload, Some("120300"));
        assert_eq!(body["adset_id"], "120300");
        assert_eq!(body["creative"], json!({ "creative_id": "238000" }));
        assert!(!body.contains_key("creative_id"));
    }

    #[test]
    fn creative_references_become_fields() {
        let payload = EntityPayload {
            fields: Map::new(),
            references: BTreeMap::from([("image_hash".to_string(), "abc123".to_string())]),
        };
        let body = create_body(EntityType::Creative, &payload, None);
        assert_eq!(body["image_hash"], "abc123");
    }

    #[test]
    fn image_upload_response_is_parsed() {
        let response = json!({
            "images": {"hero.png": {"hash": "0f1e2d", "url": "https://scontent.example/hero.png"}}
        });
        let handle = parse_image_upload(&response).unwrap();
        assert_eq!(handle.id, "0f1e2d");
        assert_eq!(handle.kind, AssetKind::Image);
        assert!(parse_image_upload(&json!({"images": {}})).is_none());
    }

    #[test]
    fn numeric_ids_are_accepted() {
        assert_eq!(id_of(&json!({"id": "42"})).as_deref(), Some("42"));
        assert_eq!(id_of(&json!({"id": 42})).as_deref(), Some("42"));
        assert!(id_of(&json!({"success": true})).is_none());
    }

    #[test]
    fn insights_page_carries_next_cursor() {
        let body = json!({
            "data": [{"impressions": "10"}, {"impressions": "12"}],
            "paging": {"next": "https://graph.example/v21.0/120200/insights?after=QVFI"}
        });
        let page = insights_page(&body);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(
            page.next.as_deref(),
            Some("https://graph.example/v21.0/120200/insights?after=QVFI")
        );

        let last = insights_page(&json!({"data": [], "paging": {"cursors": {}}}));
        assert!(last.rows.is_empty());
        assert!(last.next.is_none());
    }

    #[test]
    fn ad_accounts_are_parsed() {
        let response = json!({
            "data": [
                {"id": "act_1234", "name": "Main", "account_status": 1, "currency": "USD",
                 "timezone_name": "America/Los_Angeles"},
                {"id": "act_5678", "account_status": 2}
            ],
            "paging": {"cursors": {"before": "a", "after": "b"}}
        });
        let accounts = parse_ad_accounts(&response).unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts[0].is_active());
        assert_eq!(accounts[0].currency.as_deref(), Some("USD"));
        assert!(!accounts[1].is_active());
        assert!(accounts[1].name.is_none());

        assert!(parse_ad_accounts(&json!({})).unwrap().is_empty());
        let err = parse_ad_accounts(&json!({"data": [{"name": "no id"}]})).unwrap_err();
        assert!(matches!(err, PlatformError::Validation { .. }));
    }

    #[tokio::test]
    async fn unreachable_platform_fails_credential_check() {
        let client = client("http://127.0.0.1:9");
        let err = client.validate_credentials().await.unwrap_err();
        assert!(matches!(err, PlatformError::Transient { .. }));
        assert_eq!(client.ad_account(), "act_1234");
    }

    #[tokio::test]
    async fn video_without_url_is_rejected() {
        let client = client("https://graph.example/v21.0");
        let asset = AssetSpec {
            key: "clip".into(),
            kind: AssetKind::Video,
            path: Some("/tmp/clip.mp4".into()),
            url: None,
            name: None,
        };
        let err = client.upload(&asset).await.unwrap_err();
        assert!(matches!(err, PlatformError::Validation { .. }));
    }

    #[tokio::test]
    async fn missing_image_file_is_a_validation_error() {
        let client = client("https://graph.example/v21.0");
        let asset = AssetSpec {
            key: "hero".into(),
            kind: AssetKind::Image,
            path: Some("/nonexistent/hero.png".into()),
            url: None,
            name: None,
        };
        let err = client.upload(&asset).await.unwrap_err();
        assert!(err.to_string().contains("cannot read image"));
    }

    #[tokio::test]
    async fn static_token_refresh_is_a_no_op() {
        let client = client("https://graph.example/v21.0");
        client.refresh_credentials().await.unwrap();
        assert_eq!(client.token.read().await.expose_secret(), "test-token-not-real");
    }

    #[tokio::test]
    async fn env_refresh_fails_when_unset() {
        let mut client = client("https://graph.example/v21.0");
        client.token_source = TokenSource::Env("ADFLOW_TEST_TOKEN_THAT_IS_NEVER_SET".into());
        let err = client.refresh_credentials().await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth { .. }));
    }
}
