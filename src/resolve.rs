//! Name-to-volume resolution within a region.

use tracing::debug;

use crate::error::VolumeError;
use crate::provider::{Provider, Volume, VolumeFilter};

/// Resolves caller-facing names to exactly one remote volume.
pub struct Resolver<'a, P: Provider + ?Sized> {
    provider: &'a P,
    region: Option<&'a str>,
}

impl<'a, P: Provider + ?Sized> Resolver<'a, P> {
    /// Scopes lookups to `region` when one is known.
    pub const fn new(provider: &'a P, region: Option<&'a str>) -> Self {
        Self { provider, region }
    }

    /// Returns the single volume labelled `label`.
    ///
    /// The provider filter is treated as a hint: results are re-checked for an
    /// exact label and region match.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::NotFound`] or [`VolumeError::AmbiguousName`] for
    /// zero or several matches, and [`VolumeError::Provider`] when the lookup
    /// fails.
    pub async fn resolve(&self, label: &str) -> Result<Volume, VolumeError> {
        let filter = VolumeFilter::labelled(label, self.region);
        let mut matches: Vec<Volume> = self
            .provider
            .find_volumes(&filter)
            .await?
            .into_iter()
            .filter(|volume| filter.matches(volume))
            .collect();
        debug!(label, region = ?self.region, matches = matches.len(), "resolved volume name");

        match matches.len() {
            0 => Err(VolumeError::NotFound {
                name: label.to_owned(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(VolumeError::AmbiguousName {
                name: label.to_owned(),
                candidates: matches.into_iter().map(|volume| volume.id).collect(),
            }),
        }
    }

    /// Like [`Self::resolve`], but maps a miss to `None`.
    ///
    /// # Errors
    ///
    /// Propagates every failure other than [`VolumeError::NotFound`].
    pub async fn find(&self, label: &str) -> Result<Option<Volume>, VolumeError> {
        match self.resolve(label).await {
            Ok(volume) => Ok(Some(volume)),
            Err(VolumeError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Lists every volume in the region.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Provider`] when the listing fails.
    pub async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        let filter = VolumeFilter::in_region(self.region);
        Ok(self
            .provider
            .find_volumes(&filter)
            .await?
            .into_iter()
            .filter(|volume| filter.matches(volume))
            .collect())
    }
}
