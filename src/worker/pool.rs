use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::messages::{
    Encoder, EncoderFactory, ReplyPayload, WorkerEvent, WorkerReply, WorkerRequest,
};
use crate::config::PoolConfig;
use crate::error::CoreError;
use crate::models::{Encoding, QuantizedMatrix};

type RestartFuture = Shared<BoxFuture<'static, ()>>;

struct Slot {
    tx: Mutex<mpsc::UnboundedSender<WorkerRequest>>,
    /// Single-flight restart: at most one restart future per slot; a second
    /// restart request awaits the existing future. The mutex scope is never
    /// held across an await.
    restart: Mutex<Option<RestartFuture>>,
}

struct Pending {
    slot: usize,
    tx: oneshot::Sender<Result<ReplyPayload, CoreError>>,
}

struct PoolShared {
    slots: Vec<Slot>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    next_slot: AtomicUsize,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    factory: Arc<dyn EncoderFactory>,
    config: PoolConfig,
    shutting_down: AtomicBool,
}

/// Fixed-size pool of encoder workers, each owning one model instance on its
/// own OS thread. Requests route round-robin over live slots; replies come
/// back on one shared channel and are demultiplexed by request id.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the workers and the reply dispatcher. Must run inside a tokio
    /// runtime.
    pub fn new(factory: Arc<dyn EncoderFactory>, config: PoolConfig) -> Self {
        let size = config.size.max(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut slots = Vec::with_capacity(size);
        for slot in 0..size {
            let tx = spawn_worker(factory.clone(), slot, event_tx.clone());
            slots.push(Slot {
                tx: Mutex::new(tx),
                restart: Mutex::new(None),
            });
        }

        let shared = Arc::new(PoolShared {
            slots,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            next_slot: AtomicUsize::new(0),
            event_tx,
            factory,
            config,
            shutting_down: AtomicBool::new(false),
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::downgrade(&shared), event_rx));

        Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.slots.len()
    }

    pub async fn embed_single(&self, text: &str) -> Result<Encoding, CoreError> {
        let text = text.to_string();
        match self
            .request(move |id| WorkerRequest::EmbedSingle { id, text })
            .await?
        {
            ReplyPayload::Encoding(enc) => Ok(enc),
            other => Err(unexpected(other)),
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Encoding>, CoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self
            .request(move |id| WorkerRequest::EmbedBatch { id, texts })
            .await?
        {
            ReplyPayload::Encodings(list) => Ok(list),
            other => Err(unexpected(other)),
        }
    }

    pub async fn rerank(
        &self,
        query: QuantizedMatrix,
        docs: Vec<QuantizedMatrix>,
    ) -> Result<Vec<f32>, CoreError> {
        match self
            .request(move |id| WorkerRequest::Rerank { id, query, docs })
            .await?
        {
            ReplyPayload::Scores(scores) => Ok(scores),
            other => Err(unexpected(other)),
        }
    }

    /// Restart a slot, or join an already in-flight restart of it.
    pub async fn restart(&self, slot: usize) {
        if slot < self.shared.slots.len() {
            PoolShared::restart_slot(&self.shared, slot).await;
        }
    }

    /// Send shutdown to every worker, wait a short grace period, then
    /// detach. Idempotent.
    pub async fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for slot in &self.shared.slots {
            let _ = slot.tx.lock().send(WorkerRequest::Shutdown);
        }
        tokio::time::sleep(self.shared.config.shutdown_grace).await;
        if let Some(handle) = self.dispatcher.lock().take() {
            handle.abort();
        }
        let leftover: Vec<Pending> = {
            let mut pending = self.shared.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        for p in leftover {
            let _ = p.tx.send(Err(CoreError::PoolShutdown));
        }
    }

    async fn request(
        &self,
        make: impl FnOnce(u64) -> WorkerRequest,
    ) -> Result<ReplyPayload, CoreError> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::PoolShutdown);
        }
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = shared.next_slot.fetch_add(1, Ordering::Relaxed) % shared.slots.len();

        // If the selected slot is under restart, await it before dispatch.
        let in_flight = shared.slots[slot].restart.lock().clone();
        if let Some(restart) = in_flight {
            restart.await;
        }

        let (tx, rx) = oneshot::channel();
        shared.pending.lock().insert(id, Pending { slot, tx });

        let sent = shared.slots[slot].tx.lock().send(make(id));
        if sent.is_err() {
            shared.pending.lock().remove(&id);
            return Err(CoreError::WorkerCrash {
                slot,
                reason: "request channel closed".into(),
            });
        }

        match tokio::time::timeout(shared.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::WorkerCrash {
                slot,
                reason: "reply channel dropped".into(),
            }),
            Err(_) => {
                // The worker is not killed for one timeout; its late reply
                // will find no pending entry and be discarded.
                shared.pending.lock().remove(&id);
                Err(CoreError::WorkerTimeout(shared.config.request_timeout))
            }
        }
    }
}

impl PoolShared {
    fn restart_slot(shared: &Arc<PoolShared>, slot: usize) -> RestartFuture {
        let mut guard = shared.slots[slot].restart.lock();
        if let Some(existing) = guard.as_ref() {
            return existing.clone();
        }
        let inner = shared.clone();
        let fut: RestartFuture = async move {
            inner.do_restart(slot);
            *inner.slots[slot].restart.lock() = None;
        }
        .boxed()
        .shared();
        *guard = Some(fut.clone());
        drop(guard);
        // Drive the restart even when nothing awaits it.
        let _ = tokio::spawn(fut.clone());
        fut
    }

    fn do_restart(&self, slot: usize) {
        debug!("restarting worker slot {slot}");

        // Reject only this slot's in-flight requests.
        let rejected: Vec<Pending> = {
            let mut pending = self.pending.lock();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.slot == slot)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for p in rejected {
            let _ = p.tx.send(Err(CoreError::WorkerRestarting(slot)));
        }

        // Terminate the old worker and install a fresh one in the same slot.
        let new_tx = spawn_worker(self.factory.clone(), slot, self.event_tx.clone());
        let old_tx = std::mem::replace(&mut *self.slots[slot].tx.lock(), new_tx);
        let _ = old_tx.send(WorkerRequest::Shutdown);
    }
}

async fn dispatch_loop(
    shared: Weak<PoolShared>,
    mut event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Reply(reply) => handle_reply(&shared, reply),
            WorkerEvent::Exited { slot, error } => {
                if !shared.shutting_down.load(Ordering::SeqCst) {
                    warn!("worker {slot} exited abnormally ({error:?}); restarting");
                    let _ = PoolShared::restart_slot(&shared, slot);
                }
            }
        }
    }
}

fn handle_reply(shared: &Arc<PoolShared>, reply: WorkerReply) {
    let WorkerReply {
        id,
        slot,
        result,
        rss_bytes,
    } = reply;

    match shared.pending.lock().remove(&id) {
        Some(p) => {
            let _ = p.tx.send(result.map_err(CoreError::WorkerFailed));
        }
        // Timed out or rejected earlier: discard the late reply.
        None => debug!("discarding late reply {id} from worker {slot}"),
    }

    if let Some(rss) = rss_bytes {
        if rss > shared.config.max_worker_rss {
            warn!(
                "{}; scheduling restart",
                CoreError::WorkerMemoryPressure {
                    slot,
                    rss_bytes: rss
                }
            );
            let _ = PoolShared::restart_slot(shared, slot);
        }
    }
}

fn spawn_worker(
    factory: Arc<dyn EncoderFactory>,
    slot: usize,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
) -> mpsc::UnboundedSender<WorkerRequest> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name(format!("osgrep-encoder-{slot}"))
        .spawn({
            let event_tx = event_tx.clone();
            move || worker_loop(factory, slot, rx, event_tx)
        });
    if let Err(err) = spawned {
        let _ = event_tx.send(WorkerEvent::Exited {
            slot,
            error: Some(format!("failed to spawn worker thread: {err}")),
        });
    }
    tx
}

fn worker_loop(
    factory: Arc<dyn EncoderFactory>,
    slot: usize,
    mut rx: mpsc::UnboundedReceiver<WorkerRequest>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut encoder = match factory.create(slot) {
        Ok(encoder) => encoder,
        Err(err) => {
            let _ = event_tx.send(WorkerEvent::Exited {
                slot,
                error: Some(format!("encoder construction failed: {err}")),
            });
            return;
        }
    };

    while let Some(req) = rx.blocking_recv() {
        let Some(id) = req.id() else {
            return; // clean shutdown
        };
        let outcome =
            std::panic::catch_unwind(AssertUnwindSafe(|| execute(encoder.as_mut(), req)));
        match outcome {
            Ok(result) => {
                let reply = WorkerReply {
                    id,
                    slot,
                    result: result.map_err(|e| e.to_string()),
                    rss_bytes: encoder.rss_bytes(),
                };
                if event_tx.send(WorkerEvent::Reply(reply)).is_err() {
                    return;
                }
            }
            Err(_) => {
                let _ = event_tx.send(WorkerEvent::Reply(WorkerReply {
                    id,
                    slot,
                    result: Err("encoder panicked".into()),
                    rss_bytes: None,
                }));
                let _ = event_tx.send(WorkerEvent::Exited {
                    slot,
                    error: Some("encoder panicked".into()),
                });
                return;
            }
        }
    }
    // Request channel closed: the slot was replaced or the pool dropped.
}

fn execute(encoder: &mut dyn Encoder, req: WorkerRequest) -> anyhow::Result<ReplyPayload> {
    match req {
        WorkerRequest::EmbedSingle { text, .. } => {
            encoder.encode_query(&text).map(ReplyPayload::Encoding)
        }
        WorkerRequest::EmbedBatch { texts, .. } => {
            encoder.encode_batch(&texts).map(ReplyPayload::Encodings)
        }
        WorkerRequest::Rerank { query, docs, .. } => {
            encoder.rerank(&query, &docs).map(ReplyPayload::Scores)
        }
        WorkerRequest::Shutdown => unreachable!("shutdown handled by caller"),
    }
}

fn unexpected(payload: ReplyPayload) -> CoreError {
    CoreError::WorkerFailed(format!("unexpected reply payload: {payload:?}"))
}
