use rust_decimal::Decimal;

use crate::config::SizingPoint;
use crate::error::{CouncilError, Result};

/// Conviction -> fraction of equity, linear between breakpoints
#[derive(Debug, Clone, PartialEq)]
pub struct SizingTable {
    points: Vec<(f64, f64)>,
}

impl Default for SizingTable {
    fn default() -> Self {
        Self {
            points: vec![
                (-2.0, -0.25),
                (-1.5, -0.175),
                (-1.0, -0.10),
                (-0.5, -0.05),
                (0.0, 0.0),
                (0.5, 0.05),
                (1.0, 0.10),
                (1.5, 0.175),
                (2.0, 0.25),
            ],
        }
    }
}

impl SizingTable {
    pub fn from_points(points: &[SizingPoint]) -> Result<Self> {
        if points.len() < 2 {
            return Err(CouncilError::InvalidConfig(
                "sizing table needs at least two breakpoints".into(),
            ));
        }
        if points.windows(2).any(|w| w[0].conviction >= w[1].conviction) {
            return Err(CouncilError::InvalidConfig(
                "sizing table convictions must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            points: points.iter().map(|p| (p.conviction, p.fraction)).collect(),
        })
    }

    /// Signed fraction of equity for `conviction`, clamped to the table's ends
    pub fn fraction(&self, conviction: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return 0.0,
        };
        if conviction.is_nan() {
            return 0.0;
        }
        if conviction <= first.0 {
            return first.1;
        }
        if conviction >= last.0 {
            return last.1;
        }

        for w in self.points.windows(2) {
            let (x0, y0) = w[0];
            let (x1, y1) = w[1];
            if conviction <= x1 {
                return y0 + (y1 - y0) * (conviction - x0) / (x1 - x0);
            }
        }
        last.1
    }

    /// Signed whole-share quantity worth `fraction(conviction)` of `equity` at `price`
    pub fn target_qty(&self, conviction: f64, equity: Decimal, price: Decimal) -> Decimal {
        if price <= Decimal::ZERO || equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let fraction = Decimal::try_from(self.fraction(conviction))
            .unwrap_or(Decimal::ZERO)
            .round_dp(6);
        (equity * fraction / price).trunc()
    }
}
