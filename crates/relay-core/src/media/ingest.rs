//! Upload-with-retry, placement and variation remapping.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::reconcile::{reconcile, Match};
use super::storage::{MediaStorage, StoredSizes};
use super::{object_id, MediaError, MediaRef, Picture, PictureLink, Product, Variation};
use crate::handler::SyncContext;

/// What a failed upload turns into after its retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// The product already exists: link the source URL directly.
    Update,
    /// The product is being created: fail the whole ingestion.
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Keep(usize),
    Replace(usize),
    Append,
    /// Repeats the source URL of an earlier reference.
    SameAs(usize),
}

pub struct MediaPipeline {
    storage: Arc<dyn MediaStorage>,
    retry_delay: Duration,
}

impl MediaPipeline {
    pub fn new(storage: Arc<dyn MediaStorage>, retry_delay: Duration) -> Self {
        Self {
            storage,
            retry_delay,
        }
    }

    /// Bring `product.pictures` in line with `refs`.
    ///
    /// Returns one entry per input reference: the picture it now maps to, or
    /// `None` for references without an absolute URL. Variation links given
    /// as input indexes are rewritten to record ids. In [`IngestMode::Create`]
    /// an upload that fails twice aborts with the product untouched.
    pub async fn ingest(
        &self,
        ctx: &SyncContext,
        product: &mut Product,
        refs: &[MediaRef],
        mode: IngestMode,
    ) -> Result<Vec<Option<Picture>>, MediaError> {
        let slots = plan(&product.pictures, refs);

        let name = product.name.as_str();
        let uploads = refs.iter().zip(&slots).map(|(media, slot)| async move {
            match (media.source_url(), slot) {
                (Some(url), Some(Slot::Replace(_) | Slot::Append)) => {
                    Some(self.upload_with_retry(ctx, url, name, mode).await)
                }
                _ => None,
            }
        });
        let uploaded = join_all(uploads)
            .await
            .into_iter()
            .map(Option::transpose)
            .collect::<Result<Vec<_>, _>>()?;

        let mut mapping = Vec::with_capacity(refs.len());
        for (slot, picture) in slots.into_iter().zip(uploaded) {
            let placed = match (slot, picture) {
                (Some(Slot::Keep(idx)), _) => product.pictures.get(idx).cloned(),
                (Some(Slot::Replace(idx)), Some(picture)) => {
                    product.pictures[idx] = picture.clone();
                    Some(picture)
                }
                (Some(Slot::Append), Some(picture)) => {
                    product.pictures.push(picture.clone());
                    Some(picture)
                }
                (Some(Slot::SameAs(first)), _) => mapping.get(first).cloned().flatten(),
                _ => None,
            };
            mapping.push(placed);
        }

        remap_variations(&mut product.variations, &mapping);
        Ok(mapping)
    }

    async fn upload_with_retry(
        &self,
        ctx: &SyncContext,
        url: &str,
        name: &str,
        mode: IngestMode,
    ) -> Result<Picture, MediaError> {
        let first = match self.storage.upload(&ctx.store_id, &ctx.auth, url).await {
            Ok(sizes) => return Ok(picture_from(sizes, name)),
            Err(e) => e,
        };
        tracing::warn!(store = %ctx.store_id, url, error = %first, "upload failed, retrying");
        tokio::time::sleep(self.retry_delay).await;

        match self.storage.upload(&ctx.store_id, &ctx.auth, url).await {
            Ok(sizes) => Ok(picture_from(sizes, name)),
            Err(e) if mode == IngestMode::Update => {
                tracing::error!(
                    store = %ctx.store_id,
                    url,
                    error = %e,
                    "upload failed twice, linking source url"
                );
                Ok(Picture::fallback(url, name))
            }
            Err(e) => Err(e),
        }
    }
}

/// Decide where each reference lands before anything is uploaded.
fn plan(pictures: &[Picture], refs: &[MediaRef]) -> Vec<Option<Slot>> {
    let matches: Vec<Option<Match>> = refs
        .iter()
        .map(|r| r.source_url().map(|url| reconcile(pictures, url)))
        .collect();

    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    let repeats: Vec<Option<usize>> = refs
        .iter()
        .enumerate()
        .map(|(i, r)| match first_seen.entry(r.source_url()?) {
            Entry::Occupied(e) => Some(*e.get()),
            Entry::Vacant(e) => {
                e.insert(i);
                None
            }
        })
        .collect();

    let mut claimed: HashSet<usize> = matches
        .iter()
        .filter_map(|m| match m {
            Some(Match::Exact(idx)) => Some(*idx),
            _ => None,
        })
        .collect();

    let mut slots: Vec<Option<Slot>> = matches
        .iter()
        .zip(&repeats)
        .map(|(m, repeat)| match (m, repeat) {
            (None, _) => None,
            (Some(_), Some(first)) => Some(Slot::SameAs(*first)),
            (Some(Match::Exact(idx)), None) => Some(Slot::Keep(*idx)),
            (Some(Match::Renamed(idx)), None) if claimed.insert(*idx) => Some(Slot::Replace(*idx)),
            (Some(_), None) => Some(Slot::Append),
        })
        .collect();

    // Unmatched references take their own position when it is still free.
    for (i, (m, slot)) in matches.iter().zip(slots.iter_mut()).enumerate() {
        let unmatched = matches!((m, &*slot), (Some(Match::None), Some(Slot::Append)));
        if unmatched && i < pictures.len() && claimed.insert(i) {
            *slot = Some(Slot::Replace(i));
        }
    }
    slots
}

fn picture_from(sizes: StoredSizes, name: &str) -> Picture {
    let sizes = sizes
        .into_iter()
        .map(|(size, mut entry)| {
            entry.alt = Some(format!("{name} ({size})"));
            (size, entry)
        })
        .collect();
    Picture {
        id: Some(object_id()),
        sizes,
    }
}

/// Rewrite index links to the id of the picture at that input position.
/// Links to positions that produced no id-bearing picture are dropped.
pub fn remap_variations(variations: &mut [Variation], mapping: &[Option<Picture>]) {
    for variation in variations {
        let idx = match variation.picture_id {
            Some(PictureLink::Index(idx)) => idx,
            _ => continue,
        };
        variation.picture_id = mapping
            .get(idx)
            .and_then(Option::as_ref)
            .and_then(|p| p.id.clone())
            .map(PictureLink::Id);
    }
}
