//! Piecewise-linear membership functions.

use serde::{Deserialize, Serialize};

/// Degree of membership of a crisp value in a linguistic category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Membership {
    /// 1 up to `full_until`, falling linearly to 0 at `zero_at`.
    LeftShoulder { full_until: f64, zero_at: f64 },
    /// 0 below `a`, rising to 1 at `b`, flat to `c`, falling to 0 at `d`.
    Trapezoid { a: f64, b: f64, c: f64, d: f64 },
    /// 0 below `zero_until`, rising linearly to 1 at `full_at`, then 1.
    RightShoulder { zero_until: f64, full_at: f64 },
}

impl Membership {
    pub fn degree(&self, x: f64) -> f64 {
        match *self {
            Membership::LeftShoulder { full_until, zero_at } => {
                if x <= full_until {
                    1.0
                } else if x < zero_at {
                    (zero_at - x) / (zero_at - full_until)
                } else {
                    0.0
                }
            }
            Membership::Trapezoid { a, b, c, d } => {
                if x < a {
                    0.0
                } else if x < b {
                    (x - a) / (b - a)
                } else if x < c {
                    1.0
                } else if x < d {
                    (d - x) / (d - c)
                } else {
                    0.0
                }
            }
            Membership::RightShoulder { zero_until, full_at } => {
                if x < zero_until {
                    0.0
                } else if x < full_at {
                    (x - zero_until) / (full_at - zero_until)
                } else {
                    1.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapezoid_edges() {
        let m = Membership::Trapezoid { a: 5.0, b: 10.0, c: 20.0, d: 25.0 };
        assert_eq!(m.degree(4.9), 0.0);
        assert_eq!(m.degree(7.5), 0.5);
        assert_eq!(m.degree(10.0), 1.0);
        assert_eq!(m.degree(20.0), 1.0);
        assert_eq!(m.degree(22.5), 0.5);
        assert_eq!(m.degree(25.0), 0.0);
    }

    #[test]
    fn test_shoulders() {
        let left = Membership::LeftShoulder { full_until: 0.0, zero_at: 10.0 };
        assert_eq!(left.degree(-3.0), 1.0);
        assert_eq!(left.degree(0.0), 1.0);
        assert_eq!(left.degree(5.0), 0.5);
        assert_eq!(left.degree(10.0), 0.0);

        let right = Membership::RightShoulder { zero_until: 40.0, full_at: 60.0 };
        assert_eq!(right.degree(39.0), 0.0);
        assert_eq!(right.degree(50.0), 0.5);
        assert_eq!(right.degree(60.0), 1.0);
        assert_eq!(right.degree(120.0), 1.0);
    }
}
