//! Integer factorization helpers for block-size search
//!
//! Block dimensions must divide the operand extent, so the planner only ever
//! considers products of the extent's prime factors.

/// Prime factors of `n` in ascending order, with multiplicity.
///
/// `0` and `1` have no factors.
pub fn prime_factors(mut n: u32) -> Vec<u32> {
    let mut factors = Vec::new();
    if n < 2 {
        return factors;
    }

    let mut i = 2u32;
    while (i as u64) * (i as u64) <= n as u64 {
        if n % i == 0 {
            n /= i;
            factors.push(i);
        } else {
            i += 1;
        }
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Distinct products of every non-empty sub-multiset of `factors`, ascending.
///
/// An empty input yields `[1]` so callers always have one candidate.
pub fn product_closure(factors: &[u32]) -> Vec<u32> {
    if factors.is_empty() {
        return vec![1];
    }

    let mut products: Vec<u32> = Vec::new();
    for &factor in factors {
        let extended: Vec<u32> = products.iter().map(|p| p.saturating_mul(factor)).collect();
        products.push(factor);
        products.extend(extended);
        products.sort_unstable();
        products.dedup();
    }
    products
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn factors_of_small_numbers() {
        assert!(prime_factors(0).is_empty());
        assert!(prime_factors(1).is_empty());
        assert_eq!(prime_factors(2), vec![2]);
        assert_eq!(prime_factors(12), vec![2, 2, 3]);
        assert_eq!(prime_factors(97), vec![97]);
        assert_eq!(prime_factors(360), vec![2, 2, 2, 3, 3, 5]);
    }

    #[test]
    fn large_prime_does_not_overflow() {
        assert_eq!(prime_factors(4_294_967_291), vec![4_294_967_291]);
        assert_eq!(prime_factors(u32::MAX), vec![3, 5, 17, 257, 65537]);
    }

    #[test]
    fn closure_examples() {
        assert_eq!(product_closure(&[]), vec![1]);
        assert_eq!(product_closure(&[2, 2, 3]), vec![2, 3, 4, 6, 12]);
        assert_eq!(product_closure(&[2, 2, 2]), vec![2, 4, 8]);
        assert_eq!(product_closure(&[5]), vec![5]);
    }

    proptest! {
        #[test]
        fn prop_factors_multiply_back(n in 1u32..100_000) {
            let factors = prime_factors(n);
            prop_assert_eq!(factors.iter().product::<u32>(), n);
            prop_assert!(factors.windows(2).all(|w| w[0] <= w[1]));
            for &f in &factors {
                prop_assert!((2..f).take_while(|d| d * d <= f).all(|d| f % d != 0));
            }
        }

        #[test]
        fn prop_closure_entries_divide_n(n in 2u32..5_000) {
            let factors = prime_factors(n);
            let closure = product_closure(&factors);
            prop_assert!(closure.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(*closure.last().unwrap(), n);
            for &p in &closure {
                prop_assert_eq!(n % p, 0);
            }
            for f in &factors {
                prop_assert!(closure.contains(f));
            }
            // every divisor above 1 is some sub-multiset product
            let divisors: Vec<u32> = (2..=n).filter(|d| n % d == 0).collect();
            prop_assert_eq!(closure, divisors);
        }

        #[test]
        fn prop_closure_matches_subset_enumeration(factors in prop::collection::vec(2u32..12, 0..7)) {
            let mut expected: Vec<u32> = (1u32..1 << factors.len())
                .map(|mask| {
                    factors
                        .iter()
                        .enumerate()
                        .filter(|(bit, _)| mask & (1 << bit) != 0)
                        .map(|(_, &f)| f)
                        .product()
                })
                .collect();
            expected.sort_unstable();
            expected.dedup();
            if factors.is_empty() {
                expected = vec![1];
            }
            prop_assert_eq!(product_closure(&factors), expected);
        }
    }
}
