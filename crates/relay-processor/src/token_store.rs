//! Persistence of segment claims and tracking tokens.
//!
//! A [`TokenStore`] is the single source of truth for which segments exist,
//! how far each has read, and which processor instance currently owns it.
//! Split and merge are applied here atomically so that the set of segments
//! always covers the key space exactly once.
//!
//! Claims expire: an owner keeps a claim alive by storing its token, and a
//! claim not refreshed within the claim timeout may be taken over by another
//! instance.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{Segment, SegmentError, TrackingToken};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{TokenStoreError, TokenStoreResult};

/// Default time after which an unrefreshed claim may be taken over.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// A segment as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub segment: Segment,
    pub token: TrackingToken,
    /// Current owner, if the segment is claimed.
    pub owner: Option<String>,
}

/// Stores segments, their tokens and their claims for each processor.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Creates `segments` with `token` unless the processor already has segments.
    async fn initialize_segments(
        &self,
        processor: &str,
        segments: &[Segment],
        token: TrackingToken,
    ) -> TokenStoreResult<()>;

    /// Lists the processor's segments ordered by segment id.
    async fn fetch_segments(&self, processor: &str) -> TokenStoreResult<Vec<SegmentEntry>>;

    /// Claims a segment for `owner`, succeeding if it is unclaimed, already
    /// owned by `owner`, or its claim has expired.
    async fn claim(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<SegmentEntry>;

    /// Stores the token of an owned segment, refreshing the claim.
    async fn store_token(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
        token: TrackingToken,
    ) -> TokenStoreResult<()>;

    /// Gives up the claim on an owned segment.
    async fn release(&self, processor: &str, segment: u32, owner: &str) -> TokenStoreResult<()>;

    /// Splits an owned segment. The owner keeps the first half; the second
    /// half is inserted unclaimed with the same token.
    async fn split(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<(Segment, Segment)>;

    /// Merges an owned segment with its sibling. The sibling must not be
    /// claimed, not even by `owner`.
    ///
    /// The sibling entry is deleted and the owned entry becomes the parent,
    /// carrying the reconciled token.
    async fn merge(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<SegmentEntry>;
}

// ============================================================================
// InMemoryTokenStore
// ============================================================================

#[derive(Debug, Clone)]
struct StoredSegment {
    segment: Segment,
    token: TrackingToken,
    claim: Option<Claim>,
}

#[derive(Debug, Clone)]
struct Claim {
    owner: String,
    refreshed: Instant,
}

impl StoredSegment {
    fn live_owner(&self, now: Instant, timeout: Duration) -> Option<&str> {
        self.claim
            .as_ref()
            .filter(|claim| now.duration_since(claim.refreshed) < timeout)
            .map(|claim| claim.owner.as_str())
    }

    fn entry(&self, now: Instant, timeout: Duration) -> SegmentEntry {
        SegmentEntry {
            segment: self.segment,
            token: self.token,
            owner: self.live_owner(now, timeout).map(str::to_owned),
        }
    }
}

type ProcessorSegments = BTreeMap<u32, StoredSegment>;

/// A token store kept in process memory.
#[derive(Debug)]
pub struct InMemoryTokenStore {
    processors: Mutex<BTreeMap<String, ProcessorSegments>>,
    claim_timeout: Duration,
}

impl Default for InMemoryTokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_CLAIM_TIMEOUT)
    }
}

impl InMemoryTokenStore {
    pub fn new(claim_timeout: Duration) -> Self {
        Self {
            processors: Mutex::new(BTreeMap::new()),
            claim_timeout,
        }
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    fn with_segments<R>(
        &self,
        processor: &str,
        f: impl FnOnce(&mut ProcessorSegments, Instant) -> TokenStoreResult<R>,
    ) -> TokenStoreResult<R> {
        let mut processors = self.processors.lock();
        let segments = processors
            .get_mut(processor)
            .ok_or_else(|| TokenStoreError::NotInitialized(processor.to_string()))?;
        f(segments, Instant::now())
    }

    fn owned<'a>(
        &self,
        segments: &'a mut ProcessorSegments,
        processor: &str,
        segment: u32,
        owner: &str,
        now: Instant,
    ) -> TokenStoreResult<&'a mut StoredSegment> {
        let stored = segments
            .get_mut(&segment)
            .ok_or_else(|| TokenStoreError::UnknownSegment {
                processor: processor.to_string(),
                segment,
            })?;
        if stored.live_owner(now, self.claim_timeout) != Some(owner) {
            return Err(TokenStoreError::NotOwner {
                segment,
                owner: owner.to_string(),
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn initialize_segments(
        &self,
        processor: &str,
        segments: &[Segment],
        token: TrackingToken,
    ) -> TokenStoreResult<()> {
        let mut processors = self.processors.lock();
        if processors.contains_key(processor) {
            return Ok(());
        }
        let stored = segments
            .iter()
            .map(|segment| {
                (
                    segment.id(),
                    StoredSegment {
                        segment: *segment,
                        token,
                        claim: None,
                    },
                )
            })
            .collect();
        processors.insert(processor.to_string(), stored);
        info!(processor, segments = segments.len(), ?token, "Segments initialized");
        Ok(())
    }

    async fn fetch_segments(&self, processor: &str) -> TokenStoreResult<Vec<SegmentEntry>> {
        self.with_segments(processor, |segments, now| {
            Ok(segments
                .values()
                .map(|stored| stored.entry(now, self.claim_timeout))
                .collect())
        })
    }

    async fn claim(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<SegmentEntry> {
        self.with_segments(processor, |segments, now| {
            let stored = segments
                .get_mut(&segment)
                .ok_or_else(|| TokenStoreError::UnknownSegment {
                    processor: processor.to_string(),
                    segment,
                })?;
            if let Some(current) = stored.live_owner(now, self.claim_timeout) {
                if current != owner {
                    return Err(TokenStoreError::ClaimedByOther {
                        segment,
                        owner: current.to_string(),
                    });
                }
            }
            stored.claim = Some(Claim {
                owner: owner.to_string(),
                refreshed: now,
            });
            debug!(processor, segment, owner, "Segment claimed");
            Ok(stored.entry(now, self.claim_timeout))
        })
    }

    async fn store_token(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
        token: TrackingToken,
    ) -> TokenStoreResult<()> {
        self.with_segments(processor, |segments, now| {
            let stored = self.owned(segments, processor, segment, owner, now)?;
            stored.token = token;
            stored.claim = Some(Claim {
                owner: owner.to_string(),
                refreshed: now,
            });
            Ok(())
        })
    }

    async fn release(&self, processor: &str, segment: u32, owner: &str) -> TokenStoreResult<()> {
        self.with_segments(processor, |segments, now| {
            let stored = self.owned(segments, processor, segment, owner, now)?;
            stored.claim = None;
            debug!(processor, segment, owner, "Segment released");
            Ok(())
        })
    }

    async fn split(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<(Segment, Segment)> {
        self.with_segments(processor, |segments, now| {
            let stored = self.owned(segments, processor, segment, owner, now)?;
            let (kept, handed_off) = stored.segment.split()?;
            stored.segment = kept;
            let token = stored.token;

            segments.insert(
                handed_off.id(),
                StoredSegment {
                    segment: handed_off,
                    token,
                    claim: None,
                },
            );
            info!(processor, %kept, %handed_off, "Segment split");
            Ok((kept, handed_off))
        })
    }

    async fn merge(
        &self,
        processor: &str,
        segment: u32,
        owner: &str,
    ) -> TokenStoreResult<SegmentEntry> {
        let timeout = self.claim_timeout;
        self.with_segments(processor, |segments, now| {
            let owned = self.owned(segments, processor, segment, owner, now)?.clone();
            let sibling = owned
                .segment
                .sibling()
                .ok_or(SegmentError::NoSibling(segment))?;

            let other = segments
                .get(&sibling.id())
                .filter(|stored| stored.segment == sibling)
                .ok_or(SegmentError::SiblingNotFound {
                    segment,
                    sibling: sibling.id(),
                })?;
            if let Some(other_owner) = other.live_owner(now, timeout) {
                return Err(TokenStoreError::ClaimedByOther {
                    segment: sibling.id(),
                    owner: other_owner.to_string(),
                });
            }

            let parent = owned.segment.merged_with(&sibling)?;
            let token = TrackingToken::merge(
                (&owned.token, owned.segment),
                (&other.token, other.segment),
            )?;

            segments.remove(&segment);
            segments.remove(&sibling.id());
            let merged = StoredSegment {
                segment: parent,
                token,
                claim: Some(Claim {
                    owner: owner.to_string(),
                    refreshed: now,
                }),
            };
            let entry = merged.entry(now, timeout);
            segments.insert(parent.id(), merged);
            info!(processor, %parent, ?token, "Segments merged");
            Ok(entry)
        })
    }
}

#[cfg(test)]
mod tests {
    use relay_core::covers_key_space;

    use super::*;

    const PROCESSOR: &str = "gift-cards";

    async fn store_with(count: u32) -> InMemoryTokenStore {
        let store = InMemoryTokenStore::default();
        store
            .initialize_segments(
                PROCESSOR,
                &Segment::initial_segments(count).unwrap(),
                TrackingToken::tail(),
            )
            .await
            .unwrap();
        store
    }

    async fn segments(store: &InMemoryTokenStore) -> Vec<Segment> {
        store
            .fetch_segments(PROCESSOR)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.segment)
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = store_with(2).await;
        store
            .initialize_segments(PROCESSOR, &[Segment::ROOT], TrackingToken::at(9))
            .await
            .unwrap();
        assert_eq!(segments(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_exclusive() {
        let store = store_with(1).await;
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();

        let error = store.claim(PROCESSOR, 0, "node-b").await.unwrap_err();
        assert_eq!(
            error,
            TokenStoreError::ClaimedByOther {
                segment: 0,
                owner: "node-a".into()
            }
        );

        store.release(PROCESSOR, 0, "node-a").await.unwrap();
        store.claim(PROCESSOR, 0, "node-b").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_claim_can_be_taken_over() {
        let store = InMemoryTokenStore::new(Duration::from_secs(1));
        store
            .initialize_segments(PROCESSOR, &[Segment::ROOT], TrackingToken::tail())
            .await
            .unwrap();
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.claim(PROCESSOR, 0, "node-b").await.unwrap();
        assert!(store
            .store_token(PROCESSOR, 0, "node-a", TrackingToken::at(1))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_split_then_merge_restores_root() {
        let store = store_with(1).await;
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        store
            .store_token(PROCESSOR, 0, "node-a", TrackingToken::at(4))
            .await
            .unwrap();

        let (kept, handed_off) = store.split(PROCESSOR, 0, "node-a").await.unwrap();
        assert_eq!((kept.id(), handed_off.id()), (0, 1));
        let entries = store.fetch_segments(PROCESSOR).await.unwrap();
        assert_eq!(entries[1].owner, None);
        assert_eq!(entries[1].token, TrackingToken::at(4));
        assert!(covers_key_space(&segments(&store).await));

        let merged = store.merge(PROCESSOR, 0, "node-a").await.unwrap();
        assert_eq!(merged.segment, Segment::ROOT);
        assert_eq!(merged.token, TrackingToken::at(4));
        assert_eq!(segments(&store).await, vec![Segment::ROOT]);
    }

    #[tokio::test]
    async fn test_merge_blocked_by_foreign_claim() {
        let store = store_with(2).await;
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        store.claim(PROCESSOR, 1, "node-b").await.unwrap();

        let error = store.merge(PROCESSOR, 0, "node-a").await.unwrap_err();
        assert!(matches!(error, TokenStoreError::ClaimedByOther { segment: 1, .. }));
        assert_eq!(segments(&store).await.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_blocked_by_own_claim_on_sibling() {
        let store = store_with(2).await;
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        store.claim(PROCESSOR, 1, "node-a").await.unwrap();

        let error = store.merge(PROCESSOR, 0, "node-a").await.unwrap_err();
        assert_eq!(
            error,
            TokenStoreError::ClaimedByOther {
                segment: 1,
                owner: "node-a".into()
            }
        );

        store.release(PROCESSOR, 1, "node-a").await.unwrap();
        let merged = store.merge(PROCESSOR, 0, "node-a").await.unwrap();
        assert_eq!(merged.segment, Segment::ROOT);
    }

    #[tokio::test]
    async fn test_merge_requires_unsplit_sibling() {
        let store = store_with(2).await;
        store.claim(PROCESSOR, 1, "node-a").await.unwrap();
        store.split(PROCESSOR, 1, "node-a").await.unwrap();
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();

        let error = store.merge(PROCESSOR, 0, "node-a").await.unwrap_err();
        assert_eq!(
            error,
            TokenStoreError::Segment(SegmentError::SiblingNotFound {
                segment: 0,
                sibling: 1
            })
        );
    }

    #[tokio::test]
    async fn test_merge_with_lagging_sibling_produces_merged_token() {
        let store = store_with(2).await;
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        store
            .store_token(PROCESSOR, 0, "node-a", TrackingToken::at(10))
            .await
            .unwrap();

        let merged = store.merge(PROCESSOR, 0, "node-a").await.unwrap();
        assert_eq!(merged.token.position(), 0);
        assert_eq!(merged.token.upper_bound(), 10);
    }

    #[tokio::test]
    async fn test_split_at_minimum_granularity() {
        let store = InMemoryTokenStore::default();
        let finest = Segment::new(0, u32::MAX).unwrap();
        store
            .initialize_segments(PROCESSOR, &[finest], TrackingToken::tail())
            .await
            .unwrap();
        store.claim(PROCESSOR, 0, "node-a").await.unwrap();
        assert_eq!(
            store.split(PROCESSOR, 0, "node-a").await.unwrap_err(),
            TokenStoreError::Segment(SegmentError::AtMinimumGranularity(0))
        );
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        async fn apply(store: &InMemoryTokenStore, split: bool, pick: usize) {
            let entries = store.fetch_segments(PROCESSOR).await.unwrap();
            let segment = entries[pick % entries.len()].segment.id();
            store.claim(PROCESSOR, segment, "node-a").await.unwrap();
            // Rejected operations leave the table untouched.
            if split {
                let _ = store.split(PROCESSOR, segment, "node-a").await;
            } else {
                let _ = store.merge(PROCESSOR, segment, "node-a").await;
            }
            for entry in store.fetch_segments(PROCESSOR).await.unwrap() {
                let _ = store.release(PROCESSOR, entry.segment.id(), "node-a").await;
            }
        }

        proptest! {
            #[test]
            fn test_topology_changes_keep_exact_coverage(
                initial in 0u32..4,
                ops in prop::collection::vec((any::<bool>(), any::<usize>()), 0..40),
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let store = store_with(1 << initial).await;
                    for (split, pick) in ops {
                        apply(&store, split, pick).await;
                        prop_assert!(covers_key_space(&segments(&store).await));
                    }
                    Ok(())
                })?;
            }
        }
    }
}
