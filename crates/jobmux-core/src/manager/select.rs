//! Weighted-fair admission score.

/// `priority / sum_priorities - running / global_cap`.
///
/// Higher is better: a channel with a larger share of the total priority and
/// a smaller share of the global budget in use goes first.
pub(crate) fn admission_score(
    priority: f64,
    sum_priorities: f64,
    running: usize,
    global_cap: usize,
) -> f64 {
    let share = if sum_priorities > 0.0 {
        priority / sum_priorities
    } else {
        0.0
    };
    let used = if global_cap > 0 {
        running as f64 / global_cap as f64
    } else {
        1.0
    };
    share - used
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_wins_at_equal_load() {
        let a = admission_score(1.0, 4.0, 2, 10);
        let b = admission_score(3.0, 4.0, 2, 10);
        assert!(b > a);
    }

    #[test]
    fn running_share_lowers_score() {
        let idle = admission_score(1.0, 2.0, 0, 4);
        let busy = admission_score(1.0, 2.0, 2, 4);
        assert!((idle - 0.5).abs() < 1e-9);
        assert!((busy - 0.0).abs() < 1e-9);
    }

    #[test]
    fn zero_priority_sum_is_not_nan() {
        let s = admission_score(0.0, 0.0, 0, 4);
        assert!(!s.is_nan());
        assert_eq!(s, 0.0);
    }
}
