use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Randomly drop words at `rate` to blunt template memorization.
/// Returns the text unchanged when the rate is zero or every word would go.
pub fn degrade_text<R: Rng + ?Sized>(text: &str, rate: f64, rng: &mut R) -> String {
    if rate <= 0.0 {
        return text.to_string();
    }
    let kept: Vec<&str> = text
        .split_whitespace()
        .filter(|_| rng.gen::<f64>() >= rate)
        .collect();
    if kept.is_empty() {
        return text.to_string();
    }
    kept.join(" ")
}

/// Degrade a batch of texts with one seeded generator, in order.
pub fn degrade_all(texts: &[String], rate: f64, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    texts
        .iter()
        .map(|t| degrade_text(t, rate, &mut rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "the applicant seeks an order restraining the respondent from \
                        disposing of the property pending the hearing of this application";

    #[test]
    fn zero_rate_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(degrade_text(TEXT, 0.0, &mut rng), TEXT);
    }

    #[test]
    fn drops_some_words_and_keeps_order() {
        let mut rng = StdRng::seed_from_u64(7);
        let degraded = degrade_text(TEXT, 0.5, &mut rng);
        let original: Vec<&str> = TEXT.split_whitespace().collect();
        let kept: Vec<&str> = degraded.split_whitespace().collect();
        assert!(kept.len() < original.len());
        assert!(!kept.is_empty());

        // Kept words appear as a subsequence of the original.
        let mut it = original.iter();
        for word in &kept {
            assert!(it.any(|w| w == word), "{word} out of order");
        }
    }

    #[test]
    fn same_seed_same_output() {
        let texts = vec![TEXT.to_string(), "another short filing text here".to_string()];
        assert_eq!(degrade_all(&texts, 0.07, 42), degrade_all(&texts, 0.07, 42));
    }

    #[test]
    fn never_returns_empty_for_nonempty_input() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(degrade_text("single", 0.999, &mut rng), "single");
    }
}
