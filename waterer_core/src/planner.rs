//! Visiting order for pending stepper positions.

use itertools::Itertools;

/// Up to this many pending positions every ordering is tried.
pub const EXACT_LIMIT: usize = 8;

/// Total travel of `start → positions[order[0]] → …`.
pub fn path_cost(positions: &[i64], order: &[usize], start: i64) -> u64 {
    order
        .iter()
        .scan(start, |at, &i| {
            let next = positions[i];
            let d = at.abs_diff(next);
            *at = next;
            Some(d)
        })
        .sum()
}

/// Order the indices of `positions` to minimize stepper travel from `start`.
///
/// Small sets are solved by exhaustive search, keeping the first ordering
/// with the lowest cost. Larger ones use the line sweep: go to the nearer
/// extreme first, then sweep to the other, which is optimal on a line.
pub fn plan(positions: &[i64], start: i64) -> Vec<usize> {
    if positions.len() <= EXACT_LIMIT {
        plan_exact(positions, start)
    } else {
        plan_sweep(positions, start)
    }
}

pub fn plan_exact(positions: &[i64], start: i64) -> Vec<usize> {
    let mut best: Option<(u64, Vec<usize>)> = None;
    for order in (0..positions.len()).permutations(positions.len()) {
        let cost = path_cost(positions, &order, start);
        if best.as_ref().is_none_or(|(c, _)| cost < *c) {
            best = Some((cost, order));
        }
    }
    best.map(|(_, o)| o).unwrap_or_default()
}

pub fn plan_sweep(positions: &[i64], start: i64) -> Vec<usize> {
    let mut ascending: Vec<usize> = (0..positions.len()).collect();
    ascending.sort_by_key(|&i| positions[i]);
    let (Some(&lo), Some(&hi)) = (ascending.first(), ascending.last()) else {
        return ascending;
    };
    if start.abs_diff(positions[lo]) <= start.abs_diff(positions[hi]) {
        ascending
    } else {
        ascending.reverse();
        ascending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn is_permutation(order: &[usize], n: usize) -> bool {
        let mut seen = order.to_vec();
        seen.sort_unstable();
        seen == (0..n).collect::<Vec<_>>()
    }

    #[test]
    fn three_pots_from_home() {
        let positions = [50, 10, 30];
        let order = plan(&positions, 0);
        assert!(is_permutation(&order, 3));
        assert_eq!(path_cost(&positions, &order, 0), 50);
    }

    #[test]
    fn start_in_the_middle_goes_to_nearer_end() {
        let positions = [0, 100, 60];
        let order = plan(&positions, 70);
        // 70→100→0 = 130, 70→0→100 = 170
        assert_eq!(path_cost(&positions, &order, 70), 130);
    }

    #[test]
    fn empty_and_single() {
        assert!(plan(&[], 5).is_empty());
        assert_eq!(plan(&[42], 5), vec![0]);
    }

    #[test]
    fn large_sets_use_the_sweep() {
        let positions: Vec<i64> = (0..12).map(|i| (i * 37) % 101).collect();
        let order = plan(&positions, 200);
        assert!(is_permutation(&order, positions.len()));
        let max = *positions.iter().max().unwrap();
        let min = *positions.iter().min().unwrap();
        assert_eq!(path_cost(&positions, &order, 200), (200 - min) as u64);
        assert_eq!(positions[order[0]], max);
    }

    proptest! {
        #[test]
        fn sweep_is_as_good_as_exhaustive(
            positions in proptest::collection::vec(-500i64..500, 0..7),
            start in -600i64..600,
        ) {
            let exact = plan_exact(&positions, start);
            let sweep = plan_sweep(&positions, start);
            prop_assert!(is_permutation(&exact, positions.len()));
            prop_assert!(is_permutation(&sweep, positions.len()));
            prop_assert_eq!(
                path_cost(&positions, &exact, start),
                path_cost(&positions, &sweep, start)
            );
        }
    }
}
