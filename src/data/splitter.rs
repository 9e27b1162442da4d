// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Shuffles samples and splits them into a training and a
// validation set. A fixed seed makes the split reproducible
// across runs of the same bundle; without one the thread RNG
// is used.
//
// Both sets must end up non-empty for training: the validation
// set drives best_by_valid checkpointing and the val_loss that
// OneCycleLR monitors.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` and split into (train, validation).
///
/// `train_fraction` is rounded to whole samples and clamped so that
/// both sides keep at least one sample whenever there are two or more.
pub fn split_train_val<T>(
    mut samples:    Vec<T>,
    train_fraction: f64,
    seed:           Option<u64>,
) -> (Vec<T>, Vec<T>) {
    match seed {
        Some(seed) => samples.shuffle(&mut StdRng::seed_from_u64(seed)),
        None       => samples.shuffle(&mut rand::thread_rng()),
    }

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = if total >= 2 { split_at.clamp(1, total - 1) } else { split_at.min(total) };

    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation",
        samples.len(),
        val.len(),
    );

    (samples, val)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_split_sizes() {
        let items: Vec<usize> = (0..100).collect();
        let (train, val)      = split_train_val(items, 0.8, None);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(),   20);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (mut train, val)  = split_train_val(items, 0.7, Some(1));
        train.extend(val);
        train.sort_unstable();
        assert_eq!(train, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, Some(42));
        let b = split_train_val((0..30).collect::<Vec<usize>>(), 0.5, Some(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dataset() {
        let items: Vec<usize> = Vec::new();
        let (train, val)      = split_train_val(items, 0.8, None);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_both_sides_kept_non_empty() {
        let (train, val) = split_train_val((0..10).collect::<Vec<usize>>(), 1.0, None);
        assert_eq!(train.len(), 9);
        assert_eq!(val.len(), 1);

        let (train, val) = split_train_val((0..3).collect::<Vec<usize>>(), 0.0, None);
        assert_eq!(train.len(), 1);
        assert_eq!(val.len(), 2);
    }
}
