//! Deterministic spot-check sampling.
//!
//! Each check derives its own sub-seed from the master seed and its name via
//! BLAKE3, so a check's sample does not depend on which other checks ran or
//! in which order.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Sub-seed for one named check.
pub fn sub_seed(master_seed: u64, check_name: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&master_seed.to_le_bytes());
    hasher.update(check_name.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Up to `size` items chosen without replacement, reproducibly.
///
/// Returns every item (in original order) when there are no more than `size`.
pub fn sample<'a, T>(
    items: &'a [T],
    size: usize,
    master_seed: u64,
    check_name: &str,
) -> Vec<&'a T> {
    if items.len() <= size {
        return items.iter().collect();
    }
    let mut rng = StdRng::seed_from_u64(sub_seed(master_seed, check_name));
    items.choose_multiple(&mut rng, size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sample() {
        let items: Vec<u32> = (0..100).collect();
        let a = sample(&items, 10, 42, "silver_transformation_accuracy");
        let b = sample(&items, 10, 42, "silver_transformation_accuracy");
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
    }

    #[test]
    fn checks_draw_independent_samples() {
        assert_ne!(
            sub_seed(42, "bronze_source_spot_check"),
            sub_seed(42, "silver_transformation_accuracy")
        );
    }

    #[test]
    fn small_population_is_returned_whole() {
        let items = [1, 2, 3];
        assert_eq!(sample(&items, 25, 7, "x"), vec![&1, &2, &3]);
    }
}
