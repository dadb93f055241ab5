//! Strict pitch contract
//!
//! Agent replies are parsed into a loose `RawPitch` and then checked rule by
//! rule. The first failing rule decides the outcome. Nothing is coerced: a
//! pitch either satisfies every rule or is rejected with a `PitchViolation`.

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

use crate::agent::protocol::parse_reply;
use crate::domain::{
    Direction, EntryMode, EntryPolicy, ExitPolicy, Instrument, MacroCategory, PitchContent,
    RiskProfile, ThesisBullet, MAX_CONVICTION, MIN_CONVICTION,
};
use crate::error::AgentError;

pub const MAX_THESIS_BULLETS: usize = 5;

/// Technical-indicator vocabulary that may not appear anywhere in a pitch
pub const BANNED_TERMS: &[&str] = &[
    "RSI",
    "MACD",
    "moving average",
    "SMA",
    "EMA",
    "Bollinger",
    "stochastic",
    "Fibonacci",
    "VWAP",
    "ATR",
    "ADX",
    "OBV",
    "Ichimoku",
    "golden cross",
    "death cross",
    "support level",
    "resistance level",
    "overbought",
    "oversold",
    "head and shoulders",
    "candlestick",
];

static BANNED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = BANNED_TERMS
        .iter()
        .map(|term| regex::escape(term).replace(' ', r"[\s_-]+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
        .expect("banned-term pattern is built from fixed literals")
});

/// Whether a violation earns the corrective retry or drops the pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationClass {
    /// Banned vocabulary or non-canonical risk numbers
    Compliance,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PitchViolation {
    #[error("agent call failed: {0}")]
    Transport(AgentError),

    #[error("unparsable reply: {0}")]
    Unparsable(String),

    #[error("malformed pitch: {0}")]
    Malformed(String),

    #[error("instrument '{0}' is outside the universe")]
    UnknownInstrument(String),

    #[error("invalid direction '{0}'")]
    UnknownDirection(String),

    #[error("direction {direction} disagrees with conviction {conviction}")]
    SignMismatch { direction: Direction, conviction: f64 },

    #[error("conviction {0} is outside [-2, 2]")]
    ConvictionOutOfRange(f64),

    #[error("FLAT pitch is not canonical: {0}")]
    NonCanonicalFlat(String),

    #[error("risk parameters are not canonical: {0}")]
    NonCanonicalRisk(String),

    #[error("{0} thesis bullets exceeds the limit of 5")]
    TooManyBullets(usize),

    #[error("thesis bullet {index} has no approved category prefix: '{text}'")]
    UncategorizedBullet { index: usize, text: String },

    #[error("banned term '{term}' found in {path}")]
    BannedTerm { term: String, path: String },
}

impl PitchViolation {
    pub fn class(&self) -> ViolationClass {
        match self {
            PitchViolation::BannedTerm { .. } | PitchViolation::NonCanonicalRisk(_) => {
                ViolationClass::Compliance
            }
            _ => ViolationClass::Invalid,
        }
    }

    pub fn is_compliance(&self) -> bool {
        self.class() == ViolationClass::Compliance
    }
}

/// Pitch as the agent wrote it, before any rule is applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPitch {
    pub instrument: String,
    pub direction: String,
    pub conviction: f64,
    #[serde(default)]
    pub risk_profile: Option<String>,
    #[serde(default)]
    pub thesis_bullets: Vec<String>,
    #[serde(default)]
    pub entry_policy: Option<RawEntryPolicy>,
    #[serde(default)]
    pub exit_policy: Option<RawExitPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntryPolicy {
    pub mode: String,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExitPolicy {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    #[serde(default)]
    pub time_stop_days: Option<u32>,
}

/// Parse an agent reply and validate it into `PitchContent`
pub fn validate_reply(text: &str) -> Result<PitchContent, PitchViolation> {
    let value: Value = parse_reply(text).map_err(|e| PitchViolation::Unparsable(e.0))?;
    let raw: RawPitch = serde_json::from_value(value.clone())
        .map_err(|e| PitchViolation::Malformed(e.to_string()))?;
    validate(&raw, &value)
}

/// Apply every rule in order.
///
/// `document` is the full reply; the banned-term scan covers all of its
/// string fields, including ones `RawPitch` does not model.
pub fn validate(raw: &RawPitch, document: &Value) -> Result<PitchContent, PitchViolation> {
    let instrument = Instrument::from_str(&raw.instrument)
        .map_err(|_| PitchViolation::UnknownInstrument(raw.instrument.clone()))?;

    let direction = Direction::from_str(&raw.direction)
        .map_err(|_| PitchViolation::UnknownDirection(raw.direction.clone()))?;
    if !direction.agrees_with(raw.conviction) {
        return Err(PitchViolation::SignMismatch {
            direction,
            conviction: raw.conviction,
        });
    }

    if !(MIN_CONVICTION..=MAX_CONVICTION).contains(&raw.conviction) {
        return Err(PitchViolation::ConvictionOutOfRange(raw.conviction));
    }

    let flat = instrument.is_flat() || direction == Direction::Flat;
    let (risk_profile, entry_policy, exit_policy) = if flat {
        check_flat_shape(raw, instrument, direction)?;
        (None, EntryPolicy::none(), None)
    } else {
        let (profile, exit) = check_risk(raw)?;
        (Some(profile), check_entry(raw)?, Some(exit))
    };

    let thesis_bullets = check_bullets(&raw.thesis_bullets)?;

    if let Some((term, path)) = find_banned_term(document, "$") {
        return Err(PitchViolation::BannedTerm { term, path });
    }

    Ok(PitchContent {
        instrument,
        direction,
        conviction: raw.conviction,
        risk_profile,
        thesis_bullets,
        entry_policy,
        exit_policy,
    })
}

fn check_flat_shape(
    raw: &RawPitch,
    instrument: Instrument,
    direction: Direction,
) -> Result<(), PitchViolation> {
    if !instrument.is_flat() || direction != Direction::Flat {
        return Err(PitchViolation::NonCanonicalFlat(format!(
            "instrument {} with direction {}",
            instrument, direction
        )));
    }
    if let Some(profile) = &raw.risk_profile {
        return Err(PitchViolation::NonCanonicalFlat(format!(
            "risk_profile must be null, got {}",
            profile
        )));
    }
    if raw.exit_policy.is_some() {
        return Err(PitchViolation::NonCanonicalFlat(
            "exit_policy must be null".to_string(),
        ));
    }
    if let Some(entry) = &raw.entry_policy {
        if !entry.mode.trim().eq_ignore_ascii_case("NONE") {
            return Err(PitchViolation::NonCanonicalFlat(format!(
                "entry mode must be NONE, got {}",
                entry.mode
            )));
        }
    }
    Ok(())
}

fn check_risk(raw: &RawPitch) -> Result<(RiskProfile, ExitPolicy), PitchViolation> {
    let name = raw
        .risk_profile
        .as_deref()
        .ok_or_else(|| PitchViolation::NonCanonicalRisk("risk_profile is missing".into()))?;
    let profile = RiskProfile::from_str(name).map_err(PitchViolation::NonCanonicalRisk)?;
    let exit = raw
        .exit_policy
        .as_ref()
        .ok_or_else(|| PitchViolation::NonCanonicalRisk("exit_policy is missing".into()))?;

    if !profile.matches(exit.stop_loss_pct, exit.take_profit_pct) {
        let (stop, take) = profile.canonical_pair();
        return Err(PitchViolation::NonCanonicalRisk(format!(
            "{} requires stop {} / take {}, got {} / {}",
            profile, stop, take, exit.stop_loss_pct, exit.take_profit_pct
        )));
    }

    Ok((
        profile,
        ExitPolicy {
            stop_loss_pct: exit.stop_loss_pct,
            take_profit_pct: exit.take_profit_pct,
            time_stop_days: exit.time_stop_days,
        },
    ))
}

fn check_entry(raw: &RawPitch) -> Result<EntryPolicy, PitchViolation> {
    let entry = raw
        .entry_policy
        .as_ref()
        .ok_or_else(|| PitchViolation::Malformed("entry_policy is missing".into()))?;
    let mode: EntryMode = serde_json::from_value(Value::String(entry.mode.trim().to_ascii_uppercase()))
        .map_err(|_| PitchViolation::Malformed(format!("unknown entry mode '{}'", entry.mode)))?;

    match mode {
        EntryMode::None => Err(PitchViolation::Malformed(
            "a directional pitch needs an entry mode".into(),
        )),
        EntryMode::Limit => match entry.limit_price {
            Some(price) if price > Decimal::ZERO => Ok(EntryPolicy {
                mode,
                limit_price: Some(price),
            }),
            _ => Err(PitchViolation::Malformed(
                "LIMIT entry needs a positive limit_price".into(),
            )),
        },
        EntryMode::MarketOnOpen => Ok(EntryPolicy {
            mode,
            limit_price: None,
        }),
    }
}

fn check_bullets(bullets: &[String]) -> Result<Vec<ThesisBullet>, PitchViolation> {
    if bullets.len() > MAX_THESIS_BULLETS {
        return Err(PitchViolation::TooManyBullets(bullets.len()));
    }

    bullets
        .iter()
        .enumerate()
        .map(|(index, bullet)| {
            let uncategorized = || PitchViolation::UncategorizedBullet {
                index,
                text: bullet.clone(),
            };
            let (prefix, text) = bullet.split_once(':').ok_or_else(uncategorized)?;
            let category = MacroCategory::from_str(prefix).map_err(|_| uncategorized())?;
            let text = text.trim();
            if text.is_empty() {
                return Err(uncategorized());
            }
            Ok(ThesisBullet {
                category,
                text: text.to_string(),
            })
        })
        .collect()
}

/// First banned term in any string (keys included), with its JSON path
pub fn find_banned_term(value: &Value, path: &str) -> Option<(String, String)> {
    match value {
        Value::String(s) => BANNED_PATTERN
            .find(s)
            .map(|m| (m.as_str().to_string(), path.to_string())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| find_banned_term(item, &format!("{}[{}]", path, i))),
        Value::Object(map) => map.iter().find_map(|(key, item)| {
            let child = format!("{}.{}", path, key);
            BANNED_PATTERN
                .find(key)
                .map(|m| (m.as_str().to_string(), child.clone()))
                .or_else(|| find_banned_term(item, &child))
        }),
        _ => None,
    }
}

/// Scan a validated pitch the same way a raw reply is scanned
pub fn contains_banned_term(content: &PitchContent) -> bool {
    serde_json::to_value(content)
        .map(|v| find_banned_term(&v, "$").is_some())
        .unwrap_or(false)
}
