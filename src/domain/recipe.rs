//! Records exchanged with the discovery and extraction collaborators.

use crate::core::RecordHeader;
use crate::validation::{rules, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Candidate page returned by discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub url: String,
    pub depth: u32,
    pub discovered_at: DateTime<Utc>,
    /// Discovery's own confidence that this is a recipe page, 0.0–1.0.
    pub confidence: f32,
}

impl DiscoveredUrl {
    pub fn new(url: impl Into<String>, depth: u32) -> Self {
        Self {
            url: url.into(),
            depth,
            discovered_at: Utc::now(),
            confidence: 1.0,
        }
    }
}

/// Structured recipe produced by extraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    header: RecordHeader,
    pub title: String,
    pub source_url: String,
    pub provider_id: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    pub fingerprint_id: Option<Uuid>,
}

impl Recipe {
    pub fn new(
        title: impl Into<String>,
        source_url: impl Into<String>,
        provider_id: impl Into<String>,
        ingredients: Vec<String>,
        instructions: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let (title, source_url, provider_id) = (title.into(), source_url.into(), provider_id.into());
        let mut checks = rules::required_url("source_url", &source_url);
        checks.extend([
            rules::non_empty("title", &title),
            rules::max_len("title", &title, rules::MAX_TITLE_LENGTH),
            rules::non_empty("provider_id", &provider_id),
        ]);
        rules::validate("Recipe", checks)?;

        Ok(Self {
            header: RecordHeader::new(),
            title,
            source_url,
            provider_id,
            ingredients,
            instructions,
            fingerprint_id: None,
        })
    }

    pub fn with_fingerprint(mut self, fingerprint_id: Uuid) -> Self {
        self.fingerprint_id = Some(fingerprint_id);
        self
    }

    pub fn id(&self) -> Uuid {
        self.header.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipe_requires_title_and_url() {
        let err = Recipe::new("", "ftp://x", "p", vec![], vec![]).unwrap_err();
        assert_eq!(err.entity, "Recipe");
        assert_eq!(err.violations.len(), 2);

        let recipe = Recipe::new(
            "Pancakes",
            "https://example.com/pancakes",
            "example",
            vec!["flour".into()],
            vec!["mix".into()],
        )
        .unwrap();
        assert!(recipe.fingerprint_id.is_none());
        let fp = Uuid::new_v4();
        assert_eq!(recipe.with_fingerprint(fp).fingerprint_id, Some(fp));
    }
}
