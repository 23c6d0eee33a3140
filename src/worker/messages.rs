use crate::models::{maxsim, Encoding, QuantizedMatrix};

/// Tagged request sent to an encoder worker. Every request carries a unique
/// id echoed back in the reply.
#[derive(Debug)]
pub enum WorkerRequest {
    EmbedSingle {
        id: u64,
        text: String,
    },
    EmbedBatch {
        id: u64,
        texts: Vec<String>,
    },
    Rerank {
        id: u64,
        query: QuantizedMatrix,
        docs: Vec<QuantizedMatrix>,
    },
    Shutdown,
}

impl WorkerRequest {
    pub fn id(&self) -> Option<u64> {
        match self {
            WorkerRequest::EmbedSingle { id, .. }
            | WorkerRequest::EmbedBatch { id, .. }
            | WorkerRequest::Rerank { id, .. } => Some(*id),
            WorkerRequest::Shutdown => None,
        }
    }
}

#[derive(Debug)]
pub enum ReplyPayload {
    Encoding(Encoding),
    Encodings(Vec<Encoding>),
    Scores(Vec<f32>),
}

/// Reply from a worker, demultiplexed by the dispatcher via `id`.
#[derive(Debug)]
pub struct WorkerReply {
    pub id: u64,
    pub slot: usize,
    pub result: Result<ReplyPayload, String>,
    /// Self-reported resident set size; drives memory-triggered restarts.
    pub rss_bytes: Option<u64>,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Reply(WorkerReply),
    /// Abnormal worker termination; a clean shutdown emits nothing.
    Exited { slot: usize, error: Option<String> },
}

/// One loaded model instance, owned by a single worker thread. Calls are
/// blocking; isolation comes from the thread, not the trait.
pub trait Encoder: Send {
    /// Encode a query into dense + late-interaction + pooled parts.
    fn encode_query(&mut self, text: &str) -> anyhow::Result<Encoding>;

    /// Encode a batch of document chunks.
    fn encode_batch(&mut self, texts: &[String]) -> anyhow::Result<Vec<Encoding>>;

    /// Late-interaction scores of each doc matrix against the query matrix.
    fn rerank(
        &mut self,
        query: &QuantizedMatrix,
        docs: &[QuantizedMatrix],
    ) -> anyhow::Result<Vec<f32>> {
        Ok(docs.iter().map(|d| maxsim(query, d)).collect())
    }

    /// Current resident set size, when the implementation can report it.
    fn rss_bytes(&self) -> Option<u64> {
        None
    }
}

/// Constructs fresh encoder instances; called once per slot at startup and
/// again on every restart.
pub trait EncoderFactory: Send + Sync + 'static {
    fn create(&self, slot: usize) -> anyhow::Result<Box<dyn Encoder>>;
}
