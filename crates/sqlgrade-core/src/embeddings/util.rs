use crate::errors::ScoringError;
use sha2::{Digest, Sha256};

pub fn encode_vec_f32(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

#[allow(clippy::manual_is_multiple_of)]
pub fn decode_vec_f32(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("invalid embedding blob size {}", bytes.len());
    }
    let mut v = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        v.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(v)
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

pub fn embed_cache_key(model_id: &str, text: &str) -> String {
    format!("emb|{}|{}", model_id, sha256_hex(text))
}

/// Cosine similarity in f64. `Ok(None)` means one of the vectors has zero
/// norm and the similarity is undefined.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<Option<f64>, ScoringError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(ScoringError::DimensionMismatch {
            a: a.len(),
            b: b.len(),
        });
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return Ok(None);
    }
    // Rounding can push identical vectors a hair past 1.0.
    Ok(Some((dot / denom).clamp(-1.0, 1.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() -> anyhow::Result<()> {
        let v = vec![0.1_f32, -0.2_f32, 3.5_f32];
        let out = decode_vec_f32(&encode_vec_f32(&v))?;
        assert_eq!(v, out);
        assert!(decode_vec_f32(&[0, 1, 2]).is_err());
        Ok(())
    }

    #[test]
    fn cosine_identical_is_one() {
        let a = vec![0.3_f32, 0.4, 0.5];
        let s = cosine_similarity(&a, &a).unwrap().unwrap();
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_is_symmetric() {
        let a = vec![1.0_f32, 2.0, 0.5];
        let b = vec![0.2_f32, 1.0, 3.0];
        let ab = cosine_similarity(&a, &b).unwrap().unwrap();
        let ba = cosine_similarity(&b, &a).unwrap().unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn zero_norm_is_undefined_not_an_error() {
        let a = vec![0.0_f32, 0.0];
        let b = vec![1.0_f32, 0.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), None);
    }

    #[test]
    fn dims_mismatch_is_an_error() {
        let err = cosine_similarity(&[1.0], &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { a: 1, b: 2 }));
    }

    #[test]
    fn cache_key_depends_on_model_and_text() {
        assert_ne!(embed_cache_key("m1", "x"), embed_cache_key("m2", "x"));
        assert_ne!(embed_cache_key("m1", "x"), embed_cache_key("m1", "y"));
        assert!(embed_cache_key("m1", "x").starts_with("emb|m1|"));
    }
}
