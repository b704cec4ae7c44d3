//! Claims unowned segments and starts workers for them.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::worker::Worker;
use super::{SegmentStatus, Shared, WorkerHandle};
use crate::error::{TokenStoreError, TokenStoreResult};
use crate::token_store::SegmentEntry;

pub(crate) async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!("Coordinator started");
    loop {
        if let Err(error) = claim_round(&shared, &cancel).await {
            warn!(%error, "Claim round failed");
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.config.claim_interval) => {}
        }
    }
    debug!("Coordinator stopped");
}

async fn claim_round(shared: &Arc<Shared>, cancel: &CancellationToken) -> TokenStoreResult<()> {
    let entries = shared.token_store.fetch_segments(&shared.name).await?;

    for entry in entries {
        if cancel.is_cancelled() {
            break;
        }
        let id = entry.segment.id();
        {
            let mut state = shared.state.lock();
            if state.workers.len() >= shared.config.max_workers {
                break;
            }
            if state.workers.contains_key(&id) || state.merging.contains(&id) {
                continue;
            }
            match state.backoff.get(&id) {
                Some(until) if *until > Instant::now() => continue,
                Some(_) => {
                    state.backoff.remove(&id);
                }
                None => {}
            }
        }
        if entry.owner.as_deref().is_some_and(|owner| owner != shared.owner) {
            continue;
        }

        match shared.token_store.claim(&shared.name, id, &shared.owner).await {
            Ok(claimed) => spawn_worker(shared, claimed, cancel.child_token()),
            Err(TokenStoreError::ClaimedByOther { owner, .. }) => {
                debug!(segment = id, %owner, "Segment claimed concurrently");
            }
            Err(error) => warn!(segment = id, %error, "Failed to claim segment"),
        }
    }
    Ok(())
}

fn spawn_worker(shared: &Arc<Shared>, entry: SegmentEntry, cancel: CancellationToken) {
    let mut state = shared.state.lock();
    let id = entry.segment.id();
    if state.workers.contains_key(&id) || state.merging.contains(&id) {
        return;
    }

    state.next_generation += 1;
    let generation = state.next_generation;
    let (sender, receiver) = mpsc::unbounded_channel();
    let status = Arc::new(Mutex::new(SegmentStatus::started(entry.segment, entry.token)));
    let worker = Worker {
        shared: shared.clone(),
        generation,
        segment: entry.segment,
        token: entry.token,
        instructions: receiver,
        status: status.clone(),
        cancel,
    };
    let span = info_span!("worker", processor = %shared.name, segment = %entry.segment);
    let task = tokio::spawn(worker.run().instrument(span));

    state.failed.remove(&id);
    state.workers.insert(
        id,
        WorkerHandle {
            generation,
            segment: entry.segment,
            instructions: sender,
            status,
            task: Some(task),
        },
    );
}
