//! One adapter per venue, built once at startup and shared behind `Arc`.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{GatewayError, GatewayResult};
use crate::market_data::adapters::{Adapter, VenueAdapter};
use crate::market_data::types::{VenueInfo, VenueSlug};

pub struct VenueRegistry {
    venues: Vec<(VenueSlug, Arc<Adapter>)>,
}

impl VenueRegistry {
    /// Every supported venue.
    pub fn new(settings: &Settings) -> Self {
        Self::with_venues(settings, &VenueSlug::ALL)
    }

    pub fn with_venues(settings: &Settings, slugs: &[VenueSlug]) -> Self {
        let mut venues: Vec<(VenueSlug, Arc<Adapter>)> = Vec::with_capacity(slugs.len());
        for &slug in slugs {
            if venues.iter().any(|(s, _)| *s == slug) {
                continue;
            }
            venues.push((slug, Arc::new(Adapter::build(slug, settings))));
        }
        Self { venues }
    }

    pub fn get(&self, slug: VenueSlug) -> Option<Arc<Adapter>> {
        self.venues.iter().find(|(s, _)| *s == slug).map(|(_, a)| a.clone())
    }

    /// Lookup by the caller's slug string; unknown or unregistered venues are `VenueNotFound`.
    pub fn resolve(&self, slug: &str) -> GatewayResult<Arc<Adapter>> {
        let parsed: VenueSlug = slug.parse()?;
        self.get(parsed).ok_or_else(|| GatewayError::VenueNotFound(slug.to_string()))
    }

    pub fn slugs(&self) -> impl Iterator<Item = VenueSlug> + '_ {
        self.venues.iter().map(|(s, _)| *s)
    }

    pub fn adapters(&self) -> impl Iterator<Item = &Arc<Adapter>> {
        self.venues.iter().map(|(_, a)| a)
    }

    pub fn list_venues(&self) -> Vec<VenueInfo> {
        self.adapters().map(|a| a.info()).collect()
    }

    /// Initialize every adapter. A venue that fails to come up is logged and skipped.
    pub async fn initialize_all(&self) {
        for (slug, adapter) in &self.venues {
            match adapter.initialize().await {
                Ok(()) => info!(venue = %slug, "venue initialized"),
                Err(e) => warn!(venue = %slug, error = %e, "venue failed to initialize"),
            }
        }
    }

    pub async fn close_all(&self) {
        for (slug, adapter) in &self.venues {
            if let Err(e) = adapter.close().await {
                tracing::debug!(venue = %slug, error = %e, "close failed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::Chain;

    #[test]
    fn test_lookup() {
        let registry = VenueRegistry::new(&Settings::default());
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.get(VenueSlug::Opinion).unwrap().info().chain, Chain::Bsc);
        assert!(registry.resolve("Kalshi").is_ok());
        assert!(matches!(registry.resolve("augur"), Err(GatewayError::VenueNotFound(_))));
    }

    #[test]
    fn test_subset_and_duplicates() {
        let registry = VenueRegistry::with_venues(
            &Settings::default(),
            &[VenueSlug::Myriad, VenueSlug::Myriad, VenueSlug::Kalshi],
        );
        assert_eq!(registry.slugs().collect::<Vec<_>>(), vec![VenueSlug::Myriad, VenueSlug::Kalshi]);
        assert!(registry.get(VenueSlug::Polymarket).is_none());
        assert!(matches!(registry.resolve("polymarket"), Err(GatewayError::VenueNotFound(_))));

        let infos = registry.list_venues();
        assert_eq!(infos[0].name, "Myriad");
        assert_eq!(infos[0].chain, Chain::Abstract);
    }

    #[tokio::test]
    async fn test_lifecycle_never_fails() {
        let registry = VenueRegistry::new(&Settings::default());
        registry.initialize_all().await;
        registry.close_all().await;
        registry.close_all().await;
    }
}
