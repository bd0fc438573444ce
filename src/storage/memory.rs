//! Thread-safe in-memory repositories.

use crate::checkpoint::SagaMemento;
use crate::domain::{Fingerprint, FingerprintStatus, Recipe, RecipeBatch};
use crate::error::RepositoryError;
use crate::saga::SagaState;
use crate::traits::{
    FingerprintRepository, RecipeBatchRepository, RecipeRepository, SagaStateRepository,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, RepositoryError> {
    lock.read()
        .map_err(|_| RepositoryError::Unavailable("repository lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, RepositoryError> {
    lock.write()
        .map_err(|_| RepositoryError::Unavailable("repository lock poisoned".into()))
}

fn insert_new<T>(
    map: &mut HashMap<Uuid, T>,
    entity: &'static str,
    id: Uuid,
    value: T,
) -> Result<(), RepositoryError> {
    if map.contains_key(&id) {
        return Err(RepositoryError::Duplicate {
            entity,
            id: id.to_string(),
        });
    }
    map.insert(id, value);
    Ok(())
}

fn replace<T>(
    map: &mut HashMap<Uuid, T>,
    entity: &'static str,
    id: Uuid,
    value: T,
) -> Result<(), RepositoryError> {
    match map.get_mut(&id) {
        Some(slot) => {
            *slot = value;
            Ok(())
        }
        None => Err(RepositoryError::NotFound {
            entity,
            id: id.to_string(),
        }),
    }
}

/// Saga store keeping bincode-encoded mementos.
///
/// Loading always decodes and reconstitutes, exactly as a process
/// restarting after a crash would.
#[derive(Default)]
pub struct InMemorySagaStateRepository {
    mementos: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl InMemorySagaStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode(bytes: &[u8]) -> Result<SagaState, RepositoryError> {
        let memento = SagaMemento::from_binary(bytes)?;
        Ok(SagaState::reconstitute(memento)?)
    }
}

#[async_trait]
impl SagaStateRepository for InMemorySagaStateRepository {
    async fn add(&self, state: &SagaState) -> Result<(), RepositoryError> {
        let bytes = state.to_memento().to_binary()?;
        insert_new(&mut *write(&self.mementos)?, "SagaState", state.id(), bytes)
    }

    async fn update(&self, state: &SagaState) -> Result<(), RepositoryError> {
        let bytes = state.to_memento().to_binary()?;
        replace(&mut *write(&self.mementos)?, "SagaState", state.id(), bytes)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<SagaState>, RepositoryError> {
        read(&self.mementos)?
            .get(&id)
            .map(|bytes| Self::decode(bytes))
            .transpose()
    }

    async fn get_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<SagaState>, RepositoryError> {
        let mementos = read(&self.mementos)?;
        let mut latest: Option<SagaState> = None;
        for bytes in mementos.values() {
            let state = Self::decode(bytes)?;
            if state.correlation_id() == correlation_id
                && latest
                    .as_ref()
                    .map_or(true, |l| state.created_at() > l.created_at())
            {
                latest = Some(state);
            }
        }
        Ok(latest)
    }
}

#[derive(Default)]
pub struct InMemoryBatchRepository {
    batches: RwLock<HashMap<Uuid, RecipeBatch>>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipeBatchRepository for InMemoryBatchRepository {
    async fn add(&self, batch: &RecipeBatch) -> Result<(), RepositoryError> {
        insert_new(&mut *write(&self.batches)?, "RecipeBatch", batch.id(), batch.clone())
    }

    async fn update(&self, batch: &RecipeBatch) -> Result<(), RepositoryError> {
        replace(&mut *write(&self.batches)?, "RecipeBatch", batch.id(), batch.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<RecipeBatch>, RepositoryError> {
        Ok(read(&self.batches)?.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryFingerprintRepository {
    fingerprints: RwLock<HashMap<Uuid, Fingerprint>>,
}

impl InMemoryFingerprintRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.fingerprints).map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest_where(
        &self,
        predicate: impl Fn(&Fingerprint) -> bool,
    ) -> Result<Option<Fingerprint>, RepositoryError> {
        Ok(read(&self.fingerprints)?
            .values()
            .filter(|fp| predicate(fp))
            .max_by_key(|fp| fp.created_at())
            .cloned())
    }
}

#[async_trait]
impl FingerprintRepository for InMemoryFingerprintRepository {
    async fn add(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError> {
        insert_new(
            &mut *write(&self.fingerprints)?,
            "Fingerprint",
            fingerprint.id(),
            fingerprint.clone(),
        )
    }

    async fn update(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError> {
        replace(
            &mut *write(&self.fingerprints)?,
            "Fingerprint",
            fingerprint.id(),
            fingerprint.clone(),
        )
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Fingerprint>, RepositoryError> {
        Ok(read(&self.fingerprints)?.get(&id).cloned())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Fingerprint>, RepositoryError> {
        self.latest_where(|fp| fp.url() == url)
    }

    async fn get_latest_processed(
        &self,
        url: &str,
    ) -> Result<Option<Fingerprint>, RepositoryError> {
        self.latest_where(|fp| fp.url() == url && fp.is_processed())
    }

    async fn get_by_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Fingerprint>, RepositoryError> {
        if content_hash.is_empty() {
            return Ok(None);
        }
        self.latest_where(|fp| {
            fp.status() == FingerprintStatus::Success && fp.content_hash() == content_hash
        })
    }
}

#[derive(Default)]
pub struct InMemoryRecipeRepository {
    recipes: RwLock<HashMap<Uuid, Recipe>>,
}

impl InMemoryRecipeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored recipe, oldest first.
    pub fn all(&self) -> Vec<Recipe> {
        let mut recipes: Vec<Recipe> = read(&self.recipes)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        recipes.sort_by_key(Recipe::created_at);
        recipes
    }
}

#[async_trait]
impl RecipeRepository for InMemoryRecipeRepository {
    async fn add(&self, recipe: &Recipe) -> Result<(), RepositoryError> {
        insert_new(&mut *write(&self.recipes)?, "Recipe", recipe.id(), recipe.clone())
    }

    async fn update(&self, recipe: &Recipe) -> Result<(), RepositoryError> {
        replace(&mut *write(&self.recipes)?, "Recipe", recipe.id(), recipe.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Recipe>, RepositoryError> {
        Ok(read(&self.recipes)?.get(&id).cloned())
    }

    /// Most recent recipe scraped from `source_url`.
    async fn get_by_url(&self, source_url: &str) -> Result<Option<Recipe>, RepositoryError> {
        Ok(read(&self.recipes)?
            .values()
            .filter(|r| r.source_url == source_url)
            .max_by_key(|r| r.created_at())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentQuality;

    #[tokio::test]
    async fn saga_round_trips_through_memento() {
        let repo = InMemorySagaStateRepository::new();
        let mut saga = SagaState::create_for_recipe_processing("corr-7").unwrap();
        repo.add(&saga).await.unwrap();

        saga.start().unwrap();
        saga.update_progress("Discovering", 25, None).unwrap();
        repo.update(&saga).await.unwrap();

        let loaded = repo.get_by_id(saga.id()).await.unwrap().unwrap();
        assert_eq!(loaded.current_phase(), "Discovering");
        assert_eq!(loaded.status(), saga.status());

        let by_corr = repo.get_by_correlation_id("corr-7").await.unwrap().unwrap();
        assert_eq!(by_corr.id(), saga.id());
    }

    #[tokio::test]
    async fn add_twice_is_a_duplicate() {
        let repo = InMemoryBatchRepository::new();
        let batch = RecipeBatch::create_batch("p", 5, std::time::Duration::from_secs(60)).unwrap();
        repo.add(&batch).await.unwrap();
        assert!(matches!(
            repo.add(&batch).await,
            Err(RepositoryError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails() {
        let repo = InMemorySagaStateRepository::new();
        let saga = SagaState::create_for_recipe_processing("corr-8").unwrap();
        assert!(matches!(
            repo.update(&saga).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn fingerprint_lookups() {
        let repo = InMemoryFingerprintRepository::new();
        let content = "x".repeat(600);
        let mut fp = Fingerprint::create_success(
            "https://example.com/r/1",
            content.clone(),
            "p",
            ContentQuality::Good,
        )
        .unwrap();
        repo.add(&fp).await.unwrap();

        assert!(repo.exists_by_hash(fp.content_hash()).await.unwrap());
        assert!(!repo.exists_by_hash("").await.unwrap());
        assert!(repo
            .get_latest_processed("https://example.com/r/1")
            .await
            .unwrap()
            .is_none());

        fp.mark_as_processed(None).unwrap();
        repo.update(&fp).await.unwrap();
        let latest = repo
            .get_latest_processed("https://example.com/r/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id(), fp.id());
        assert_eq!(repo.len(), 1);
    }
}
