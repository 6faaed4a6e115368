// Tests for RNG reproducibility and distribution.

use convnet_layers::utils::SimpleRng;

// ============================================================================
// Reproducibility
// ============================================================================

mod reproducibility_tests {
    use super::*;

    #[test]
    fn test_rng_same_seed_produces_same_sequence() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_rng_different_seeds_produce_different_sequences() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(54321);

        let different = (0..10).any(|_| rng1.next_u32() != rng2.next_u32());
        assert!(different, "Different seeds should produce different sequences");
    }

    #[test]
    fn test_rng_zero_seed_is_usable() {
        let mut rng = SimpleRng::new(0);
        let first = rng.next_u32();
        assert!((0..10).any(|_| rng.next_u32() != first));
    }

    #[test]
    fn test_clone_continues_same_sequence() {
        let mut rng = SimpleRng::new(77);
        rng.next_u32();
        let mut copy = rng.clone();
        for _ in 0..20 {
            assert_eq!(rng.next_gaussian(), copy.next_gaussian());
        }
    }

    #[test]
    fn test_randn_reproducible() {
        let a = SimpleRng::new(5).randn(&[3, 4, 2]);
        let b = SimpleRng::new(5).randn(&[3, 4, 2]);
        assert_eq!(a, b);
        assert_eq!(a.shape(), &[3, 4, 2]);
    }
}

// ============================================================================
// Distribution
// ============================================================================

mod distribution_tests {
    use super::*;

    #[test]
    fn test_next_f64_distribution() {
        let mut rng = SimpleRng::new(42);
        let n = 10000;
        let count_low = (0..n).filter(|_| rng.next_f64() < 0.5).count();

        // Allow 5% deviation from an even split
        let low_ratio = count_low as f64 / n as f64;
        assert!(
            low_ratio > 0.45 && low_ratio < 0.55,
            "Low ratio {} should be close to 0.5",
            low_ratio
        );
    }

    #[test]
    fn test_gen_usize_range() {
        let mut rng = SimpleRng::new(9);
        let mut seen = [false; 7];
        for _ in 0..1000 {
            let v = rng.gen_usize(7);
            assert!(v < 7);
            seen[v] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_gaussian_moments() {
        let mut rng = SimpleRng::new(2024);
        let n = 20000;
        let samples: Vec<f64> = (0..n).map(|_| rng.next_gaussian()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.05, "mean {mean} should be near 0");
        assert!((var - 1.0).abs() < 0.05, "variance {var} should be near 1");
    }

    #[test]
    fn test_randn_has_both_signs() {
        let a = SimpleRng::new(8).randn(&[50]);
        assert!(a.iter().any(|&v| v > 0.0));
        assert!(a.iter().any(|&v| v < 0.0));
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
