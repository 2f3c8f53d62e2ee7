//! Vector numerics shared by the embedder, index, and store: little-endian
//! float32 byte packing, L2 normalization, and dot product.

/// Serialize a float vector to little-endian IEEE-754 bytes (the embedding
/// column format: `len * 4` bytes).
pub fn to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode little-endian float32 bytes back into a vector. Trailing bytes that
/// do not form a full float are ignored.
pub fn from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Scale `v` in place so its Euclidean length is 1. The zero vector is left
/// untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product. For unit-norm inputs this is the cosine similarity.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_byte_roundtrip() {
        let v = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE, 1e30];
        assert_eq!(from_bytes(&to_bytes(&v)), v);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        assert_eq!(to_bytes(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = to_bytes(&[1.0, 2.0]);
        bytes.push(0xff);
        assert_eq!(from_bytes(&bytes), vec![1.0, 2.0]);
    }

    #[test]
    fn test_normalize_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_is_fixed_point() {
        let mut v = vec![0.1, -7.3, 2.2, 0.0];
        l2_normalize(&mut v);
        let once = v.clone();
        l2_normalize(&mut v);
        for (a, b) in once.iter().zip(v.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_dot_of_unit_vectors_bounded() {
        let mut a = vec![1.0, 2.0, 3.0];
        let mut b = vec![-3.0, 1.0, 0.5];
        l2_normalize(&mut a);
        l2_normalize(&mut b);
        let d = dot(&a, &b);
        assert!(d >= -1.0 - 1e-4 && d <= 1.0 + 1e-4);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-4);
    }
}
