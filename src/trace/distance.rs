//! Branch distance computation
//!
//! For every predicate evaluation the tracer records two non-negative
//! distances: how far the operands were from making the predicate true, and
//! how far from making it false. The side actually taken always has distance
//! zero. Strict and non-strict orderings add one to the operand gap so that
//! the boundary itself is never mistaken for the goal.

/// Comparison operator of a numeric predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Comparison::Eq => a == b,
            Comparison::Ne => a != b,
            Comparison::Lt => a < b,
            Comparison::Le => a <= b,
            Comparison::Gt => a > b,
            Comparison::Ge => a >= b,
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Comparison::Eq => Comparison::Ne,
            Comparison::Ne => Comparison::Eq,
            Comparison::Lt => Comparison::Ge,
            Comparison::Le => Comparison::Gt,
            Comparison::Gt => Comparison::Le,
            Comparison::Ge => Comparison::Lt,
        }
    }
}

/// Distances to the true and false outcome of one predicate evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchDistance {
    pub true_distance: f64,
    pub false_distance: f64,
}

impl BranchDistance {
    pub fn new(true_distance: f64, false_distance: f64) -> Self {
        BranchDistance {
            true_distance,
            false_distance,
        }
    }

    /// Outcome of the evaluation this distance was computed for.
    pub fn outcome(&self) -> bool {
        self.true_distance == 0.0
    }
}

/// Distance for a comparison of two numeric operands.
///
/// Operands are compared in `f64`, which is exact for every `i32` and for
/// `i64` values up to 2^53.
pub fn compare(a: f64, op: Comparison, b: f64) -> BranchDistance {
    if a.is_nan() || b.is_nan() {
        return if op == Comparison::Ne {
            BranchDistance::new(0.0, 1.0)
        } else {
            BranchDistance::new(1.0, 0.0)
        };
    }
    let (t, f) = match op {
        Comparison::Eq => {
            let t = (a - b).abs();
            (t, if t == 0.0 { 1.0 } else { 0.0 })
        }
        Comparison::Ne => {
            let f = (a - b).abs();
            (if f == 0.0 { 1.0 } else { 0.0 }, f)
        }
        Comparison::Lt => (
            if a >= b { a - b + 1.0 } else { 0.0 },
            if a < b { b - a + 1.0 } else { 0.0 },
        ),
        Comparison::Ge => (
            if a < b { b - a + 1.0 } else { 0.0 },
            if a >= b { a - b + 1.0 } else { 0.0 },
        ),
        Comparison::Gt => (
            if a <= b { b - a + 1.0 } else { 0.0 },
            if a > b { a - b + 1.0 } else { 0.0 },
        ),
        Comparison::Le => (
            if a > b { a - b + 1.0 } else { 0.0 },
            if a <= b { b - a + 1.0 } else { 0.0 },
        ),
    };
    BranchDistance::new(t, f)
}

pub fn compare_ints(a: i64, op: Comparison, b: i64) -> BranchDistance {
    compare(a as f64, op, b as f64)
}

/// Distance for a reference (non-)null check. Either side costs exactly 1.
pub fn null_check(is_null: bool, expect_null: bool) -> BranchDistance {
    if is_null == expect_null {
        BranchDistance::new(0.0, 1.0)
    } else {
        BranchDistance::new(1.0, 0.0)
    }
}

/// Distance for a reference identity comparison.
pub fn reference_equality(same: bool, op: Comparison) -> BranchDistance {
    let holds = match op {
        Comparison::Ne => !same,
        _ => same,
    };
    if holds {
        BranchDistance::new(0.0, 1.0)
    } else {
        BranchDistance::new(1.0, 0.0)
    }
}

/// Map a raw distance into `[0, 1)`, preserving order.
pub fn normalize(distance: f64) -> f64 {
    if distance.is_infinite() {
        1.0
    } else {
        distance / (distance + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_distances() {
        assert_eq!(compare_ints(3, Comparison::Eq, 10), BranchDistance::new(7.0, 0.0));
        assert_eq!(compare_ints(10, Comparison::Eq, 10), BranchDistance::new(0.0, 1.0));
        assert_eq!(compare_ints(10, Comparison::Ne, 10), BranchDistance::new(1.0, 0.0));
        assert_eq!(compare_ints(4, Comparison::Ne, 10), BranchDistance::new(0.0, 6.0));
    }

    #[test]
    fn test_taken_side_is_zero() {
        let ops = [
            Comparison::Eq,
            Comparison::Ne,
            Comparison::Lt,
            Comparison::Le,
            Comparison::Gt,
            Comparison::Ge,
        ];
        for op in ops {
            for a in -5..=5 {
                for b in -5..=5 {
                    let d = compare_ints(a, op, b);
                    let holds = op.holds(a, b);
                    assert_eq!(d.outcome(), holds, "{} {:?} {}", a, op, b);
                    if holds {
                        assert_eq!(d.true_distance, 0.0);
                        assert!(d.false_distance > 0.0);
                    } else {
                        assert_eq!(d.false_distance, 0.0);
                        assert!(d.true_distance > 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_less_than_distance_is_monotone() {
        let a = 10;
        let mut previous = f64::INFINITY;
        for b in -20..=10 {
            let d = compare_ints(a, Comparison::Lt, b).true_distance;
            assert!(d < previous);
            previous = d;
        }
        assert_eq!(compare_ints(a, Comparison::Lt, 10).true_distance, 1.0);
        assert_eq!(compare_ints(a, Comparison::Lt, 11).true_distance, 0.0);
    }

    #[test]
    fn test_null_and_nan() {
        assert_eq!(null_check(true, true), BranchDistance::new(0.0, 1.0));
        assert_eq!(null_check(false, true), BranchDistance::new(1.0, 0.0));
        assert!(!compare(f64::NAN, Comparison::Eq, 1.0).outcome());
        assert!(compare(f64::NAN, Comparison::Ne, 1.0).outcome());
        assert_eq!(normalize(0.0), 0.0);
        assert_eq!(normalize(1.0), 0.5);
    }
}
