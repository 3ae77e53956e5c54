//! Set and vector similarity used by the dedup stages.

use std::collections::{HashMap, HashSet};

/// Jaccard similarity `|A ∩ B| / |A ∪ B|` over the token *sets*.
/// Two empty inputs are defined as `0.0`.
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let sa: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let sb: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    inter as f64 / union as f64
}

/// Term-frequency vector over a token list.
pub fn term_frequencies<S: AsRef<str>>(tokens: &[S]) -> HashMap<&str, f64> {
    let mut tf = HashMap::new();
    for t in tokens {
        *tf.entry(t.as_ref()).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity of the term-frequency vectors of two token lists, over
/// their shared vocabulary. Zero-norm vectors yield `0.0`.
pub fn cosine<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let va = term_frequencies(a);
    let vb = term_frequencies(b);

    let dot: f64 = va
        .iter()
        .filter_map(|(term, x)| vb.get(term).map(|y| x * y))
        .sum();
    let norm_a = va.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = vb.values().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // Rounding can push identical vectors a hair above 1.
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn jaccard_identity_symmetry_and_empty() {
        let a = toks("company x profits rise");
        let b = toks("company y profits fall");
        assert_eq!(jaccard(&a, &a), 1.0);
        assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
        assert!((jaccard(&a, &b) - 2.0 / 6.0).abs() < 1e-9);
        let empty: Vec<String> = Vec::new();
        assert_eq!(jaccard(&empty, &empty), 0.0);
        assert_eq!(jaccard(&a, &empty), 0.0);
    }

    #[test]
    fn jaccard_ignores_repeats() {
        let a = toks("rise rise rise");
        let b = toks("rise");
        assert_eq!(jaccard(&a, &b), 1.0);
    }

    #[test]
    fn cosine_bounds() {
        let a = toks("profit growth strong growth");
        let b = toks("loss decline weak");
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&a, &b), 0.0);
        let c = toks("profit growth weak");
        let s = cosine(&a, &c);
        assert!(s > 0.0 && s < 1.0);
        assert!((s - cosine(&c, &a)).abs() < 1e-12);
    }

    #[test]
    fn cosine_zero_norm_is_zero() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(cosine(&empty, &toks("a b")), 0.0);
        assert_eq!(cosine(&empty, &empty), 0.0);
    }
}
