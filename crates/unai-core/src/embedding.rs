//! Vector helpers for stored document embeddings.
//!
//! Vectors are persisted as little-endian `f32` BLOBs and compared with
//! cosine similarity during the brute-force similarity scan.

use std::cmp::Ordering;

/// Encode a vector as `len × 4` little-endian bytes.
///
/// ```rust
/// use unai_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5f32, -1.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
/// ```
pub fn vec_to_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. A trailing partial value is
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|c| c.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

/// Cosine similarity in `[-1, 1]`. Mismatched lengths, empty input and
/// zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, x2, y2), (x, y)| {
            (d + x * y, x2 + x * x, y2 + y * y)
        });
    let norm = (sq_a * sq_b).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

/// Score candidates against a query vector and keep those at or above
/// `threshold`, highest similarity first, capped at `limit`.
///
/// Candidates without a vector are skipped. Ties keep their input order.
pub fn rank_by_similarity<T, I>(query: &[f32], candidates: I, threshold: f32, limit: usize) -> Vec<(T, f32)>
where
    I: IntoIterator<Item = (T, Option<Vec<f32>>)>,
{
    let mut scored: Vec<(T, f32)> = candidates
        .into_iter()
        .filter_map(|(item, vector)| {
            let sim = cosine_similarity(query, vector.as_deref()?);
            (sim >= threshold).then_some((item, sim))
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}
