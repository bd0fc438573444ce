use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{DiscoveredUrl, Fingerprint, Recipe, RecipeBatch};
use crate::error::{ItemError, RepositoryError};
use crate::saga::SagaState;

// ============================================================================
// COLLABORATORS: discovery, fetching, extraction (side effects live here)
// ============================================================================

#[async_trait]
pub trait UrlDiscovery: Send + Sync {
    /// Crawl outward from `seed_url`, returning at most `max_urls` candidates.
    async fn discover_urls(
        &self,
        seed_url: &str,
        max_depth: u32,
        max_urls: u32,
    ) -> Result<Vec<DiscoveredUrl>, ItemError>;

    /// Provider-specific check that a URL points at a single recipe page.
    fn is_recipe_url(&self, url: &str, provider_id: &str) -> bool;
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ItemError>;
}

#[async_trait]
pub trait RecipeExtractor: Send + Sync {
    async fn extract(
        &self,
        raw_content: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Recipe, ItemError>;
}

/// Outbound request throttle shared by every saga hitting a provider.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self);
    fn release(&self);
}

// ============================================================================
// REPOSITORIES: persistence of every aggregate the saga touches
// ============================================================================

#[async_trait]
pub trait SagaStateRepository: Send + Sync {
    async fn add(&self, state: &SagaState) -> Result<(), RepositoryError>;
    async fn update(&self, state: &SagaState) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<SagaState>, RepositoryError>;
    async fn get_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<SagaState>, RepositoryError>;
}

#[async_trait]
pub trait RecipeBatchRepository: Send + Sync {
    async fn add(&self, batch: &RecipeBatch) -> Result<(), RepositoryError>;
    async fn update(&self, batch: &RecipeBatch) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<RecipeBatch>, RepositoryError>;
}

#[async_trait]
pub trait FingerprintRepository: Send + Sync {
    async fn add(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError>;
    async fn update(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Fingerprint>, RepositoryError>;
    /// Most recent fingerprint for `url`.
    async fn get_by_url(&self, url: &str) -> Result<Option<Fingerprint>, RepositoryError>;
    /// Latest processed fingerprint for `url`, used for change detection.
    async fn get_latest_processed(
        &self,
        url: &str,
    ) -> Result<Option<Fingerprint>, RepositoryError>;
    /// Any successful fingerprint carrying `content_hash`.
    async fn get_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Fingerprint>, RepositoryError>;

    async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, RepositoryError> {
        Ok(self.get_by_hash(content_hash).await?.is_some())
    }
}

#[async_trait]
pub trait RecipeRepository: Send + Sync {
    async fn add(&self, recipe: &Recipe) -> Result<(), RepositoryError>;
    async fn update(&self, recipe: &Recipe) -> Result<(), RepositoryError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Recipe>, RepositoryError>;
    async fn get_by_url(&self, source_url: &str) -> Result<Option<Recipe>, RepositoryError>;
}
