//! Few-shot prototype arithmetic.

use super::ctc::softmax;

/// Mean of equally sized embeddings. `None` for an empty or ragged set.
pub fn mean_embedding(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    if dim == 0 || embeddings.iter().any(|e| e.len() != dim) {
        return None;
    }
    let mut mean = vec![0.0f32; dim];
    for embedding in embeddings {
        for (acc, v) in mean.iter_mut().zip(embedding) {
            *acc += v;
        }
    }
    let n = embeddings.len() as f32;
    mean.iter_mut().for_each(|v| *v /= n);
    Some(mean)
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Nearest prototype to `query`, with confidence as a percentage: the
/// softmax over negated distances, taken at the winner.
pub fn nearest_prototype<'a>(
    query: &[f32],
    prototypes: &'a [(String, Vec<f32>)],
) -> Option<(&'a str, f32)> {
    if prototypes.is_empty() {
        return None;
    }
    let distances: Vec<f32> = prototypes
        .iter()
        .map(|(_, proto)| euclidean_distance(query, proto))
        .collect();
    let (best, _) = distances
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let negated: Vec<f32> = distances.iter().map(|d| -d).collect();
    let probs = softmax(&negated);
    let confidence = probs.get(best).copied().unwrap_or(0.0) * 100.0;
    Some((prototypes[best].0.as_str(), confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_embeddings() {
        let mean = mean_embedding(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(mean, vec![2.0, 3.0]);
        assert_eq!(mean_embedding(&[]), None);
        assert_eq!(mean_embedding(&[vec![1.0], vec![1.0, 2.0]]), None);
    }

    #[test]
    fn picks_closest_class() {
        let prototypes = vec![
            ("pressure".to_string(), vec![0.0, 0.0]),
            ("thermometer".to_string(), vec![10.0, 10.0]),
        ];
        let (class, confidence) = nearest_prototype(&[9.0, 9.5], &prototypes).unwrap();
        assert_eq!(class, "thermometer");
        assert!(confidence > 99.0 && confidence <= 100.0);
    }

    #[test]
    fn equidistant_prototypes_split_confidence() {
        let prototypes = vec![
            ("a".to_string(), vec![-1.0]),
            ("b".to_string(), vec![1.0]),
        ];
        let (_, confidence) = nearest_prototype(&[0.0], &prototypes).unwrap();
        assert!((confidence - 50.0).abs() < 1e-3);
    }

    #[test]
    fn no_prototypes_is_none() {
        assert_eq!(nearest_prototype(&[1.0], &[]), None);
    }
}
