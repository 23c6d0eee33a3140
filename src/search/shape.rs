use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ScoringConfig;
use crate::models::ChunkRecord;
use crate::search::rerank::Scored;

/// `*.{test,spec}.{c,m,}{j,t}sx?` filenames.
static TEST_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(?:test|spec)\.[cm]?[jt]sx?$").unwrap());

/// A candidate with its final shaped score.
#[derive(Debug, Clone)]
pub struct Ranked {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Blends the rerank and RRF signals, applies structural boosts and
/// penalties, and caps results per file.
pub struct ScoreShaper {
    fused_weight: f32,
    anchor_penalty: f32,
    code_boost: f32,
    test_penalty: f32,
    doc_penalty: f32,
    max_per_file: usize,
}

impl ScoreShaper {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            fused_weight: config.fused_weight,
            anchor_penalty: config.anchor_penalty,
            code_boost: config.code_boost,
            test_penalty: config.test_penalty,
            doc_penalty: config.doc_penalty,
            max_per_file: config.max_per_file,
        }
    }

    /// `final = rerank + fused_weight * rrf`, then multiplicative shaping,
    /// then a descending sort (stable, so equal scores keep rerank order).
    pub fn shape(&self, items: Vec<Scored>) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = items
            .into_iter()
            .map(|s| {
                let mut score = s.rerank_score + self.fused_weight * s.rrf_score;
                if s.record.is_anchor {
                    // Anchors lose ties against real code.
                    score *= self.anchor_penalty;
                } else if s.record.chunk_type.is_code() {
                    score *= self.code_boost;
                }
                if is_test_path(&s.record.path) {
                    score *= self.test_penalty;
                }
                if is_doc_path(&s.record.path) {
                    score *= self.doc_penalty;
                }
                Ranked {
                    record: s.record,
                    score,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Admit at most `max_per_file` records per path, in descending score
    /// order, stopping at `limit`.
    pub fn diversify(&self, ranked: Vec<Ranked>, limit: usize) -> Vec<Ranked> {
        let mut per_file: HashMap<String, usize> = HashMap::new();
        let mut out = Vec::with_capacity(limit.min(ranked.len()));
        for item in ranked {
            let seen = per_file.entry(item.record.path.clone()).or_insert(0);
            if *seen >= self.max_per_file {
                continue;
            }
            *seen += 1;
            out.push(item);
            if out.len() >= limit {
                break;
            }
        }
        out
    }
}

fn is_test_path(path: &str) -> bool {
    if path
        .split('/')
        .any(|seg| matches!(seg, "__tests__" | "test" | "tests" | "spec" | "specs"))
    {
        return true;
    }
    TEST_FILE_RE.is_match(path)
}

fn is_doc_path(path: &str) -> bool {
    [".md", ".mdx", ".txt", ".json", ".lock"]
        .iter()
        .any(|ext| path.ends_with(ext))
        || path.contains("/docs/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{chunk_id, ChunkType};

    fn scored(path: &str, rerank: f32, rrf: f32) -> Scored {
        Scored {
            record: ChunkRecord {
                id: chunk_id(path, 0),
                path: path.into(),
                start_line: 1,
                end_line: 1,
                ..Default::default()
            },
            rrf_score: rrf,
            rerank_score: rerank,
        }
    }

    fn shaper() -> ScoreShaper {
        ScoreShaper::new(&ScoringConfig::default())
    }

    // ── structural shaping ───────────────────────────────

    #[test]
    fn test_anchor_loses_tie_against_non_anchor() {
        let mut anchor = scored("a.rs", 1.0, 0.0);
        anchor.record.is_anchor = true;
        let plain = scored("b.rs", 1.0, 0.0);

        let ranked = shaper().shape(vec![anchor, plain]);
        assert_eq!(ranked[0].record.path, "b.rs");
        assert_eq!(ranked[1].record.path, "a.rs");
    }

    #[test]
    fn test_test_path_demoted_on_equal_score() {
        let src = scored("src/foo.ts", 1.0, 0.0);
        let test = scored("src/__tests__/foo.test.ts", 1.0, 0.0);

        let ranked = shaper().shape(vec![test, src]);
        assert_eq!(ranked[0].record.path, "src/foo.ts");
    }

    #[test]
    fn test_code_chunk_boosted_over_block() {
        let mut func = scored("a.rs", 1.0, 0.0);
        func.record.chunk_type = ChunkType::Function;
        let block = scored("b.rs", 1.0, 0.0);

        let ranked = shaper().shape(vec![block, func]);
        assert_eq!(ranked[0].record.path, "a.rs");
    }

    #[test]
    fn test_anchor_never_gets_code_boost() {
        let mut anchored = scored("a.rs", 1.0, 0.0);
        anchored.record.chunk_type = ChunkType::Function;
        anchored.record.is_anchor = true;
        let plain = scored("b.rs", 1.0, 0.0);

        let ranked = shaper().shape(vec![anchored, plain]);
        assert_eq!(ranked[0].record.path, "b.rs");
    }

    #[test]
    fn test_doc_paths_demoted() {
        let code = scored("src/lib.rs", 1.0, 0.0);
        let readme = scored("README.md", 1.0, 0.0);
        let lock = scored("Cargo.lock", 1.0, 0.0);
        let docs = scored("site/docs/guide.html", 1.0, 0.0);

        let ranked = shaper().shape(vec![readme, lock, docs, code]);
        assert_eq!(ranked[0].record.path, "src/lib.rs");
    }

    #[test]
    fn test_blend_uses_fused_weight() {
        // rerank 1.0 + 0.5 * rrf 0.4 = 1.2
        let ranked = shaper().shape(vec![scored("a.rs", 1.0, 0.4)]);
        assert!((ranked[0].score - 1.2).abs() < 1e-6);
    }

    // ── test/doc path detection ──────────────────────────

    #[test]
    fn test_test_path_detection() {
        assert!(is_test_path("src/__tests__/x.ts"));
        assert!(is_test_path("pkg/tests/x.rs"));
        assert!(is_test_path("a/spec/y.rb"));
        assert!(is_test_path("src/foo.test.ts"));
        assert!(is_test_path("src/foo.spec.jsx"));
        assert!(is_test_path("src/foo.test.mjs"));
        assert!(is_test_path("src/foo.test.cts"));
        assert!(!is_test_path("src/contest/foo.ts"));
        assert!(!is_test_path("src/latest.ts"));
        assert!(!is_test_path("src/foo.ts"));
    }

    #[test]
    fn test_doc_path_detection() {
        assert!(is_doc_path("README.md"));
        assert!(is_doc_path("guide.mdx"));
        assert!(is_doc_path("notes.txt"));
        assert!(is_doc_path("package.json"));
        assert!(is_doc_path("yarn.lock"));
        assert!(is_doc_path("site/docs/page.html"));
        assert!(!is_doc_path("src/markdown.rs"));
    }

    // ── diversification ──────────────────────────────────

    #[test]
    fn test_diversify_caps_per_file() {
        let shaper = shaper();
        let ranked: Vec<Ranked> = (0..6)
            .map(|i| Ranked {
                record: ChunkRecord {
                    path: "hot.rs".into(),
                    chunk_index: i,
                    ..Default::default()
                },
                score: 1.0 - i as f32 * 0.01,
            })
            .chain(std::iter::once(Ranked {
                record: ChunkRecord {
                    path: "cold.rs".into(),
                    ..Default::default()
                },
                score: 0.5,
            }))
            .collect();

        let out = shaper.diversify(ranked, 10);
        let hot = out.iter().filter(|r| r.record.path == "hot.rs").count();
        assert_eq!(hot, 3);
        assert!(out.iter().any(|r| r.record.path == "cold.rs"));
    }

    #[test]
    fn test_diversify_stops_at_limit() {
        let shaper = shaper();
        let ranked: Vec<Ranked> = (0..10)
            .map(|i| Ranked {
                record: ChunkRecord {
                    path: format!("f{i}.rs"),
                    ..Default::default()
                },
                score: 1.0,
            })
            .collect();
        assert_eq!(shaper.diversify(ranked, 4).len(), 4);
    }
}
