//! Catalog lookup - maps abstract image names and size classes onto
//! provider catalog values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-specific OS image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl ImageReference {
    pub fn new(publisher: &str, offer: &str, sku: &str, version: &str) -> Self {
        Self {
            publisher: publisher.to_string(),
            offer: offer.to_string(),
            sku: sku.to_string(),
            version: version.to_string(),
        }
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.publisher, self.offer, self.sku, self.version
        )
    }
}

/// Abstract name with no provider mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("unknown image: {0}")]
    UnknownImage(String),
    #[error("unknown size: {0}")]
    UnknownSize(String),
}

/// Lookup collaborator used by drivers before any provider call.
pub trait Catalog: Send + Sync {
    /// Resolve an abstract image name.
    fn image_reference(&self, image: &str) -> Result<ImageReference, CatalogError>;

    /// Resolve the capacity tier for a size class.
    fn tier(&self, size: &str) -> Result<String, CatalogError>;

    /// Reverse lookup used when folding provider state back into a snapshot.
    fn image_name(&self, reference: &ImageReference) -> Option<String>;
}

/// Catalog overrides as they appear in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub images: BTreeMap<String, ImageReference>,
    /// Exact size class to tier.
    #[serde(default)]
    pub tiers: BTreeMap<String, String>,
}

/// Table-backed catalog.
///
/// Tiers resolve by exact size first, then by the size's prefix up to the
/// first `_` (`Standard_DS2_v2` -> `Standard`).
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    images: BTreeMap<String, ImageReference>,
    tiers: BTreeMap<String, String>,
    tier_prefixes: BTreeMap<String, String>,
}

impl StaticCatalog {
    /// An empty catalog with no images and no tiers.
    pub fn empty() -> Self {
        Self {
            images: BTreeMap::new(),
            tiers: BTreeMap::new(),
            tier_prefixes: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, name: &str, reference: ImageReference) -> Self {
        self.images.insert(name.to_string(), reference);
        self
    }

    pub fn with_tier(mut self, size: &str, tier: &str) -> Self {
        self.tiers.insert(size.to_string(), tier.to_string());
        self
    }

    /// Layer configured overrides on top of this catalog.
    pub fn merged(mut self, config: &CatalogConfig) -> Self {
        self.images
            .extend(config.images.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.tiers
            .extend(config.tiers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        let mut catalog = Self::empty()
            .with_image(
                "ubuntu-16.04-x64",
                ImageReference::new("Canonical", "UbuntuServer", "16.04-LTS", "latest"),
            )
            .with_image(
                "ubuntu-18.04-x64",
                ImageReference::new("Canonical", "UbuntuServer", "18.04-LTS", "latest"),
            )
            .with_image(
                "centos-7.4-x64",
                ImageReference::new("OpenLogic", "CentOS", "7.4", "latest"),
            );
        for tier in ["Standard", "Basic"] {
            catalog
                .tier_prefixes
                .insert(tier.to_string(), tier.to_string());
        }
        catalog
    }
}

impl Catalog for StaticCatalog {
    fn image_reference(&self, image: &str) -> Result<ImageReference, CatalogError> {
        self.images
            .get(image)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownImage(image.to_string()))
    }

    fn tier(&self, size: &str) -> Result<String, CatalogError> {
        if let Some(tier) = self.tiers.get(size) {
            return Ok(tier.clone());
        }
        size.split_once('_')
            .and_then(|(prefix, _)| self.tier_prefixes.get(prefix))
            .cloned()
            .ok_or_else(|| CatalogError::UnknownSize(size.to_string()))
    }

    fn image_name(&self, reference: &ImageReference) -> Option<String> {
        self.images
            .iter()
            .find(|(_, r)| *r == reference)
            .map(|(name, _)| name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_image_lookup() {
        let catalog = StaticCatalog::default();
        let reference = catalog.image_reference("ubuntu-16.04-x64").unwrap();
        assert_eq!(reference.offer, "UbuntuServer");
        assert_eq!(
            catalog.image_name(&reference).as_deref(),
            Some("ubuntu-16.04-x64")
        );
    }

    #[test]
    fn test_unknown_image() {
        let catalog = StaticCatalog::default();
        assert_eq!(
            catalog.image_reference("no-such-image"),
            Err(CatalogError::UnknownImage("no-such-image".to_string()))
        );
    }

    #[test]
    fn test_tier_by_prefix_and_exact() {
        let catalog = StaticCatalog::default().with_tier("DS1", "Premium");
        assert_eq!(catalog.tier("Standard_DS2_v2").unwrap(), "Standard");
        assert_eq!(catalog.tier("Basic_A1").unwrap(), "Basic");
        assert_eq!(catalog.tier("DS1").unwrap(), "Premium");
        assert_eq!(
            catalog.tier("Huge"),
            Err(CatalogError::UnknownSize("Huge".to_string()))
        );
    }

    #[test]
    fn test_merged_overrides() {
        let mut config = CatalogConfig::default();
        config.images.insert(
            "debian-9".to_string(),
            ImageReference::new("credativ", "Debian", "9", "latest"),
        );
        let catalog = StaticCatalog::empty().merged(&config);
        assert!(catalog.image_reference("debian-9").is_ok());
        assert!(catalog.image_reference("ubuntu-16.04-x64").is_err());
    }
}
