use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tradable universe plus the FLAT sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Spy,
    Qqq,
    Iwm,
    Tlt,
    Hyg,
    Gld,
    Uso,
    Uup,
    Efa,
    Eem,
    /// No trade
    Flat,
}

/// The ten instruments pitches may name (FLAT excluded)
pub const UNIVERSE: [Instrument; 10] = [
    Instrument::Spy,
    Instrument::Qqq,
    Instrument::Iwm,
    Instrument::Tlt,
    Instrument::Hyg,
    Instrument::Gld,
    Instrument::Uso,
    Instrument::Uup,
    Instrument::Efa,
    Instrument::Eem,
];

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Spy => "SPY",
            Instrument::Qqq => "QQQ",
            Instrument::Iwm => "IWM",
            Instrument::Tlt => "TLT",
            Instrument::Hyg => "HYG",
            Instrument::Gld => "GLD",
            Instrument::Uso => "USO",
            Instrument::Uup => "UUP",
            Instrument::Efa => "EFA",
            Instrument::Eem => "EEM",
            Instrument::Flat => "FLAT",
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Instrument::Flat)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized == "FLAT" {
            return Ok(Instrument::Flat);
        }
        UNIVERSE
            .iter()
            .copied()
            .find(|i| i.as_str() == normalized)
            .ok_or_else(|| format!("instrument '{}' is not in the universe", raw.trim()))
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Flat => "FLAT",
        }
    }

    /// Sign a conviction must carry for this direction
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Flat => 0,
        }
    }

    /// Whether `conviction` has the sign this direction requires
    pub fn agrees_with(&self, conviction: f64) -> bool {
        match self {
            Direction::Long => conviction > 0.0,
            Direction::Short => conviction < 0.0,
            Direction::Flat => conviction == 0.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Flat => Direction::Flat,
        }
    }

    pub fn from_conviction(conviction: f64) -> Self {
        if conviction > 0.0 {
            Direction::Long
        } else if conviction < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            "FLAT" => Ok(Direction::Flat),
            other => Err(format!("invalid direction '{}'", other)),
        }
    }
}

/// Conviction bounds
pub const MAX_CONVICTION: f64 = 2.0;
pub const MIN_CONVICTION: f64 = -2.0;

/// Canonical stop/take pairs. Pitches must quote one of these exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskProfile {
    Tight,
    Base,
    Wide,
}

impl RiskProfile {
    pub const ALL: [RiskProfile; 3] = [RiskProfile::Tight, RiskProfile::Base, RiskProfile::Wide];

    /// (stop_loss_pct, take_profit_pct)
    pub fn canonical_pair(&self) -> (f64, f64) {
        match self {
            RiskProfile::Tight => (0.010, 0.015),
            RiskProfile::Base => (0.015, 0.025),
            RiskProfile::Wide => (0.025, 0.040),
        }
    }

    /// Exact comparison, no tolerance
    #[allow(clippy::float_cmp)]
    pub fn matches(&self, stop_loss_pct: f64, take_profit_pct: f64) -> bool {
        let (stop, take) = self.canonical_pair();
        stop_loss_pct.to_bits() == stop.to_bits() && take_profit_pct.to_bits() == take.to_bits()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::Tight => "TIGHT",
            RiskProfile::Base => "BASE",
            RiskProfile::Wide => "WIDE",
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskProfile {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TIGHT" => Ok(RiskProfile::Tight),
            "BASE" => Ok(RiskProfile::Base),
            "WIDE" => Ok(RiskProfile::Wide),
            other => Err(format!("invalid risk profile '{}'", other)),
        }
    }
}

/// Approved thesis categories. Every bullet must open with one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MacroCategory {
    Policy,
    Inflation,
    Growth,
    Labor,
    Credit,
    Liquidity,
    Fx,
    Geopolitics,
}

impl MacroCategory {
    pub const ALL: [MacroCategory; 8] = [
        MacroCategory::Policy,
        MacroCategory::Inflation,
        MacroCategory::Growth,
        MacroCategory::Labor,
        MacroCategory::Credit,
        MacroCategory::Liquidity,
        MacroCategory::Fx,
        MacroCategory::Geopolitics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MacroCategory::Policy => "POLICY",
            MacroCategory::Inflation => "INFLATION",
            MacroCategory::Growth => "GROWTH",
            MacroCategory::Labor => "LABOR",
            MacroCategory::Credit => "CREDIT",
            MacroCategory::Liquidity => "LIQUIDITY",
            MacroCategory::Fx => "FX",
            MacroCategory::Geopolitics => "GEOPOLITICS",
        }
    }
}

impl fmt::Display for MacroCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MacroCategory {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase();
        MacroCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown macro category '{}'", raw.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_parsing() {
        assert_eq!("spy".parse::<Instrument>().unwrap(), Instrument::Spy);
        assert_eq!(" FLAT ".parse::<Instrument>().unwrap(), Instrument::Flat);
        assert!("TSLA".parse::<Instrument>().is_err());
        assert_eq!(UNIVERSE.len(), 10);
        assert!(!UNIVERSE.contains(&Instrument::Flat));
    }

    #[test]
    fn test_direction_sign_agreement() {
        assert!(Direction::Long.agrees_with(0.5));
        assert!(!Direction::Long.agrees_with(-0.5));
        assert!(!Direction::Long.agrees_with(0.0));
        assert!(Direction::Short.agrees_with(-2.0));
        assert!(Direction::Flat.agrees_with(0.0));
        assert!(!Direction::Flat.agrees_with(0.1));
    }

    #[test]
    fn test_risk_profile_exact_match() {
        assert!(RiskProfile::Base.matches(0.015, 0.025));
        assert!(!RiskProfile::Base.matches(0.02, 0.025));
        assert!(!RiskProfile::Base.matches(0.010, 0.015));
        assert!(RiskProfile::Tight.matches(0.01, 0.015));
        // Close is not equal
        assert!(!RiskProfile::Wide.matches(0.025000001, 0.04));
    }

    #[test]
    fn test_macro_category_parsing() {
        assert_eq!("growth".parse::<MacroCategory>().unwrap(), MacroCategory::Growth);
        assert_eq!("FX".parse::<MacroCategory>().unwrap(), MacroCategory::Fx);
        assert!("MOMENTUM".parse::<MacroCategory>().is_err());
        assert_eq!(MacroCategory::ALL.len(), 8);
    }
}
