use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Structural kind of a chunk, assigned by the (external) chunker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Function,
    Class,
    Method,
    Interface,
    TypeAlias,
    Block,
    Other,
}

impl Default for ChunkType {
    fn default() -> Self {
        ChunkType::Other
    }
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Method => "method",
            ChunkType::Interface => "interface",
            ChunkType::TypeAlias => "type_alias",
            ChunkType::Block => "block",
            ChunkType::Other => "other",
        }
    }

    /// Code-shaped chunk types that earn the structural boost.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            ChunkType::Function
                | ChunkType::Class
                | ChunkType::Method
                | ChunkType::Interface
                | ChunkType::TypeAlias
        )
    }
}

/// Quantized per-token embedding matrix (row-major, one row per token).
/// Rows are L2-normalized before quantization; `float = i8 * scale` when
/// dequantizing. An empty `data` is the canonical absent form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuantizedMatrix {
    pub data: Vec<i8>,
    pub dim: usize,
    pub scale: f32,
}

impl QuantizedMatrix {
    pub fn new(data: Vec<i8>, dim: usize, scale: f32) -> Self {
        Self { data, dim, scale }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.dim == 0
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    pub fn row(&self, i: usize) -> &[i8] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// MaxSim late-interaction score: for each query token row, take the max dot
/// product over document token rows, and sum across query tokens. Dequantizes
/// row-by-row; no full f32 matrix is built.
pub fn maxsim(query: &QuantizedMatrix, doc: &QuantizedMatrix) -> f32 {
    if query.is_empty() || doc.is_empty() || query.dim != doc.dim {
        return 0.0;
    }
    let factor = query.scale * doc.scale;
    let mut total = 0.0f32;
    for qi in 0..query.rows() {
        let q = query.row(qi);
        let mut best = f32::NEG_INFINITY;
        for di in 0..doc.rows() {
            let d = doc.row(di);
            let mut acc = 0i32;
            for (a, b) in q.iter().zip(d.iter()) {
                acc += (*a as i32) * (*b as i32);
            }
            let val = acc as f32 * factor;
            if val > best {
                best = val;
            }
        }
        total += best;
    }
    total
}

/// Dense + late-interaction + pooled encoding of one text. Used both for
/// queries and for document chunks.
#[derive(Debug, Clone, Default)]
pub struct Encoding {
    pub dense: Vec<f32>,
    pub colbert: QuantizedMatrix,
    /// Mean-pooled + projected summary of `colbert`; unit-norm.
    pub pooled: Vec<f32>,
}

/// A single indexed chunk, as stored in and returned by the vector store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Repo-relative, POSIX-normalized.
    pub path: String,
    pub chunk_index: u32,
    pub content: String,
    #[serde(default)]
    pub display_text: String,
    #[serde(default)]
    pub context_prev: String,
    #[serde(default)]
    pub context_next: String,
    /// 1-based inclusive; `end_line >= start_line`.
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default)]
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub is_anchor: bool,
    pub hash: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub colbert: QuantizedMatrix,
    #[serde(default)]
    pub pooled_colbert: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_token_ids: Option<Vec<u32>>,
}

impl ChunkRecord {
    /// Fusion key: the stable id, or `path:chunk_index` when id is absent.
    pub fn fusion_key(&self) -> String {
        if self.id.is_empty() {
            format!("{}:{}", self.path, self.chunk_index)
        } else {
            self.id.clone()
        }
    }
}

/// Deterministic chunk id so fusion keys collide across re-indexes.
pub fn chunk_id(path: &str, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"#");
    hasher.update(chunk_index.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 hex of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Per-file change-detection entry, keyed by absolute path in the meta file.
/// The on-disk field names match the historical meta format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileMetaEntry {
    pub hash: String,
    #[serde(rename = "mtimeMs")]
    pub mtime_ms: u64,
    pub size: u64,
}

impl<'de> Deserialize<'de> for FileMetaEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Legacy meta files stored a bare hash string per path; missing
        // numeric fields normalize to zero and unknown fields are dropped.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Entry {
            Full {
                #[serde(default)]
                hash: String,
                #[serde(rename = "mtimeMs", default)]
                mtime_ms: u64,
                #[serde(default)]
                size: u64,
            },
            Legacy(String),
        }

        Ok(match Entry::deserialize(deserializer)? {
            Entry::Full {
                hash,
                mtime_ms,
                size,
            } => FileMetaEntry {
                hash,
                mtime_ms,
                size,
            },
            Entry::Legacy(hash) => FileMetaEntry {
                hash,
                mtime_ms: 0,
                size: 0,
            },
        })
    }
}

/// Per-search options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Late-interaction rerank; when off, RRF order is kept.
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { rerank: true }
    }
}

/// Public query result shape.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub data: Vec<SearchItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
    pub score: f32,
    pub metadata: ItemMetadata,
    pub generated_metadata: GeneratedMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemMetadata {
    pub path: String,
    pub hash: String,
    pub is_anchor: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedMetadata {
    pub start_line: u32,
    pub num_lines: u32,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── ids and hashing ──────────────────────────────────

    #[test]
    fn test_chunk_id_deterministic() {
        assert_eq!(chunk_id("src/main.rs", 0), chunk_id("src/main.rs", 0));
        assert_ne!(chunk_id("src/main.rs", 0), chunk_id("src/main.rs", 1));
        assert_ne!(chunk_id("src/main.rs", 0), chunk_id("src/lib.rs", 0));
        assert_eq!(chunk_id("a", 0).len(), 64);
    }

    #[test]
    fn test_fusion_key_falls_back_to_path() {
        let mut rec = ChunkRecord {
            path: "src/a.rs".into(),
            chunk_index: 3,
            ..Default::default()
        };
        assert_eq!(rec.fusion_key(), "src/a.rs:3");
        rec.id = "abc".into();
        assert_eq!(rec.fusion_key(), "abc");
    }

    // ── meta entry normalization ─────────────────────────

    #[test]
    fn test_meta_entry_full() {
        let e: FileMetaEntry =
            serde_json::from_str(r#"{"hash":"h1","mtimeMs":42,"size":7}"#).unwrap();
        assert_eq!(e.hash, "h1");
        assert_eq!(e.mtime_ms, 42);
        assert_eq!(e.size, 7);
    }

    #[test]
    fn test_meta_entry_missing_fields_default_to_zero() {
        let e: FileMetaEntry = serde_json::from_str(r#"{"hash":"h1"}"#).unwrap();
        assert_eq!(e.mtime_ms, 0);
        assert_eq!(e.size, 0);
    }

    #[test]
    fn test_meta_entry_legacy_string() {
        let e: FileMetaEntry = serde_json::from_str(r#""bare-hash""#).unwrap();
        assert_eq!(e.hash, "bare-hash");
        assert_eq!(e.mtime_ms, 0);
        assert_eq!(e.size, 0);
    }

    #[test]
    fn test_meta_entry_unknown_fields_ignored() {
        let e: FileMetaEntry =
            serde_json::from_str(r#"{"hash":"h","mtimeMs":1,"size":2,"extra":true}"#).unwrap();
        assert_eq!(e.hash, "h");
        assert_eq!(e.size, 2);
    }

    // ── vector math ──────────────────────────────────────

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    // ── maxsim ───────────────────────────────────────────

    fn quantize_rows(rows: &[Vec<f32>], scale: f32) -> QuantizedMatrix {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let data = rows
            .iter()
            .flat_map(|r| r.iter().map(|x| (x / scale).round() as i8))
            .collect();
        QuantizedMatrix::new(data, dim, scale)
    }

    #[test]
    fn test_maxsim_picks_best_doc_token_per_query_token() {
        let scale = 0.01;
        let query = quantize_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]], scale);
        let doc = quantize_rows(&[vec![1.0, 0.0], vec![0.0, 0.5]], scale);
        // query token 0 -> doc token 0 (1.0), query token 1 -> doc token 1 (0.5)
        let score = maxsim(&query, &doc);
        assert!((score - 1.5).abs() < 0.05, "score = {score}");
    }

    #[test]
    fn test_maxsim_empty_doc_scores_zero() {
        let query = quantize_rows(&[vec![1.0, 0.0]], 0.01);
        assert_eq!(maxsim(&query, &QuantizedMatrix::default()), 0.0);
        assert_eq!(maxsim(&QuantizedMatrix::default(), &query), 0.0);
    }

    #[test]
    fn test_maxsim_dim_mismatch_scores_zero() {
        let q = quantize_rows(&[vec![1.0, 0.0]], 0.01);
        let d = quantize_rows(&[vec![1.0, 0.0, 0.0]], 0.01);
        assert_eq!(maxsim(&q, &d), 0.0);
    }
}
