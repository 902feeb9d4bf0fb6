//! Account lock ordering
//!
//! Any transaction that locks more than one account row must lock them in
//! ascending id order. Two transfers between the same pair in opposite
//! directions then contend for the same first lock instead of each holding
//! one row and waiting on the other.

/// Indices of `ids` in the order their rows must be locked.
///
/// Ascending by id; the sort is stable, so repeated ids keep caller order.
pub fn lock_order(ids: &[i64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_by_key(|&i| ids[i]);
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_is_direction_independent() {
        let forward = lock_order(&[7, 3]);
        let backward = lock_order(&[3, 7]);

        let ids_forward: Vec<i64> = forward.iter().map(|&i| [7, 3][i]).collect();
        let ids_backward: Vec<i64> = backward.iter().map(|&i| [3, 7][i]).collect();
        assert_eq!(ids_forward, vec![3, 7]);
        assert_eq!(ids_forward, ids_backward);
    }

    #[test]
    fn test_order_many_accounts() {
        assert_eq!(lock_order(&[42, 5, 17, 1]), vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_duplicates_keep_caller_order() {
        assert_eq!(lock_order(&[9, 2, 9]), vec![1, 0, 2]);
    }

    #[test]
    fn test_empty() {
        assert!(lock_order(&[]).is_empty());
    }
}
