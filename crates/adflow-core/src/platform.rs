//! Ad platform capability traits.
//!
//! The engine never talks to an HTTP API directly. Each narrow capability
//! below is implemented by an adapter (see `adflow-infra::graph`) that maps
//! its transport failures onto [`PlatformError`]. [`AdPlatform`] bundles them
//! so the engine can be generic over a single type parameter.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::collections::BTreeMap;
use std::future::Future;

use adflow_types::error::PlatformError;
use adflow_types::workflow::{AssetHandle, AssetSpec, DateRange, EntityType};
use serde_json::{Map, Value};

/// Fields for a new entity plus resolved references to other tasks' outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPayload {
    pub fields: Map<String, Value>,
    /// Field name -> resolved external id (creative id, image hash, ...).
    pub references: BTreeMap<String, String>,
}

pub trait EntityCreator: Send + Sync {
    /// Create an entity and return its external id.
    fn create(
        &self,
        entity_type: EntityType,
        payload: &EntityPayload,
        parent_id: Option<&str>,
    ) -> impl Future<Output = Result<String, PlatformError>> + Send;
}

pub trait EntityUpdater: Send + Sync {
    fn update(
        &self,
        entity_type: EntityType,
        external_id: &str,
        fields: &Map<String, Value>,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

pub trait EntityDeleter: Send + Sync {
    fn delete(
        &self,
        entity_type: EntityType,
        external_id: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

pub trait EntityReader: Send + Sync {
    /// Whether the entity still exists on the platform.
    fn exists(
        &self,
        entity_type: EntityType,
        external_id: &str,
    ) -> impl Future<Output = Result<bool, PlatformError>> + Send;
}

pub trait AssetUploader: Send + Sync {
    fn upload(
        &self,
        asset: &AssetSpec,
    ) -> impl Future<Output = Result<AssetHandle, PlatformError>> + Send;
}

/// One page of insight rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsPage {
    pub rows: Vec<Value>,
    /// Opaque cursor for the following page; `None` on the last page.
    pub next: Option<String>,
}

pub trait InsightsQuery: Send + Sync {
    /// Fetch one page of insight rows for an entity. `cursor` is `None` for
    /// the first page and the previous page's `next` afterwards.
    ///
    /// Rows are returned as the platform shaped them; no aggregation happens
    /// here.
    fn fetch(
        &self,
        entity_id: &str,
        date_range: &DateRange,
        metrics: &[String],
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<InsightsPage, PlatformError>> + Send;
}

/// Hook invoked before an auth-failed call is retried.
pub trait CredentialRefresher: Send + Sync {
    fn refresh_credentials(&self) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Everything the workflow engine needs from an ad platform.
pub trait AdPlatform:
    EntityCreator
    + EntityUpdater
    + EntityDeleter
    + EntityReader
    + AssetUploader
    + InsightsQuery
    + CredentialRefresher
{
}

impl<T> AdPlatform for T where
    T: EntityCreator
        + EntityUpdater
        + EntityDeleter
        + EntityReader
        + AssetUploader
        + InsightsQuery
        + CredentialRefresher
{
}
