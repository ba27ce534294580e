//! Greedy CTC decoding.
//!
//! The blank symbol sits at index `vocab.len()`, after every vocabulary
//! character.

/// Decoded sequence and its confidence in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct CtcDecoded {
    pub text: String,
    pub confidence: f32,
}

/// Decode per-step logits (`steps x (vocab + 1)`).
///
/// Each step is softmaxed, the best class kept, repeats collapsed and blanks
/// removed. Confidence is the mean of the per-step maxima. Returns `None`
/// when there are no steps.
pub fn greedy_decode(logits: &[Vec<f32>], vocab: &[char]) -> Option<CtcDecoded> {
    if logits.is_empty() {
        return None;
    }
    let blank = vocab.len();
    let mut text = String::new();
    let mut previous: Option<usize> = None;
    let mut confidence_sum = 0.0f32;

    for step in logits {
        let probs = softmax(step);
        let (best, prob) = probs
            .iter()
            .copied()
            .enumerate()
            .fold((blank, f32::NEG_INFINITY), |acc, (i, p)| {
                if p > acc.1 {
                    (i, p)
                } else {
                    acc
                }
            });
        confidence_sum += prob.max(0.0);
        if previous != Some(best) && best != blank {
            if let Some(ch) = vocab.get(best) {
                text.push(*ch);
            }
        }
        previous = Some(best);
    }

    Some(CtcDecoded {
        text,
        confidence: confidence_sum / logits.len() as f32,
    })
}

pub(crate) fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; values.len()];
    }
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(index: usize, classes: usize) -> Vec<f32> {
        let mut step = vec![-10.0; classes];
        step[index] = 10.0;
        step
    }

    #[test]
    fn collapses_repeats_and_drops_blanks() {
        let vocab: Vec<char> = "0123456789.".chars().collect();
        let blank = vocab.len();
        let classes = vocab.len() + 1;
        // 4 4 _ 2 . . 0 _
        let steps = [4, 4, blank, 2, 10, 10, 0, blank];
        let logits: Vec<Vec<f32>> = steps.iter().map(|&i| one_hot(i, classes)).collect();
        let decoded = greedy_decode(&logits, &vocab).unwrap();
        assert_eq!(decoded.text, "42.0");
        assert!(decoded.confidence > 0.99);
    }

    #[test]
    fn blank_separates_repeated_characters() {
        let vocab = ['1'];
        let logits = vec![one_hot(0, 2), one_hot(1, 2), one_hot(0, 2)];
        assert_eq!(greedy_decode(&logits, &vocab).unwrap().text, "11");
    }

    #[test]
    fn confidence_is_mean_of_step_maxima() {
        let vocab = ['a'];
        // Uniform step contributes 0.5, sharp step ~1.0.
        let logits = vec![vec![0.0, 0.0], one_hot(0, 2)];
        let decoded = greedy_decode(&logits, &vocab).unwrap();
        assert!((decoded.confidence - 0.75).abs() < 1e-3);
    }

    #[test]
    fn no_steps_is_none() {
        assert_eq!(greedy_decode(&[], &['a']), None);
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }
}
