//! Retrieval-quality metrics for benchmark runs: given ranked result paths
//! and an expected path, compute found / reciprocal rank / recall.

/// Outcome of scoring one query's results against an expectation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOutcome {
    pub found: bool,
    pub reciprocal_rank: f64,
    pub recall: f64,
}

/// Score a ranked list of result paths. `expected` matches by path suffix
/// (results may be absolute while expectations are repo-relative). When an
/// `avoid` path ranks at or above the expected one, the query counts as a
/// miss.
pub fn evaluate(results: &[String], expected: &str, avoid: Option<&str>) -> EvalOutcome {
    let expected_rank = rank_of(results, expected);
    let avoid_rank = avoid.and_then(|a| rank_of(results, a));

    match expected_rank {
        Some(rank) if avoid_rank.map_or(true, |a| a > rank) => EvalOutcome {
            found: true,
            reciprocal_rank: 1.0 / (rank as f64 + 1.0),
            recall: 1.0,
        },
        _ => EvalOutcome {
            found: false,
            reciprocal_rank: 0.0,
            recall: 0.0,
        },
    }
}

/// 0-based rank of the first result whose path ends with `needle`.
fn rank_of(results: &[String], needle: &str) -> Option<usize> {
    results.iter().position(|p| p.ends_with(needle))
}
