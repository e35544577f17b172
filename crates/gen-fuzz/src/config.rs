use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::Serialize;

/// Which guidance engine drives the campaign.
///
/// `Zest` and `Zeal` feed generators from a single linear choice stream;
/// `Zeal` additionally profiles call/alloc events for the event log.
/// `BeDivFuzz` uses the split structure/value stream and the diversity
/// metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineKind {
    Zest,
    Zeal,
    BeDivFuzz,
}

impl EngineKind {
    /// Split engines keep structural and value choices in separate streams.
    pub const fn is_split(self) -> bool {
        matches!(self, Self::BeDivFuzz)
    }

    pub const fn profiles_execution(self) -> bool {
        matches!(self, Self::Zeal)
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zest" => Ok(Self::Zest),
            "zeal" => Ok(Self::Zeal),
            "bedivfuzz" => Ok(Self::BeDivFuzz),
            other => Err(ConfigError::UnknownEngine(other.to_owned())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Zest => "zest",
            Self::Zeal => "zeal",
            Self::BeDivFuzz => "bedivfuzz",
        };
        f.write_str(name)
    }
}

/// Format of the periodic progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatsStyle {
    Afl,
    LibFuzzer,
}

impl FromStr for StatsStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "afl" => Ok(Self::Afl),
            "libfuzzer" => Ok(Self::LibFuzzer),
            other => Err(ConfigError::UnknownStatsStyle(other.to_owned())),
        }
    }
}

/// Campaign configuration. Validated once, before any trial runs.
#[derive(Debug, Clone, Serialize)]
pub struct FuzzConfig {
    pub engine: EngineKind,
    pub out_dir: PathBuf,
    pub seeds_dir: Option<PathBuf>,
    /// Wall-clock budget; `None` means unbounded.
    pub duration: Option<Duration>,
    /// Trial-count budget; `None` means unbounded.
    pub trials: Option<u64>,
    pub random_seed: u64,
    /// Disable the novelty filter; every input is generated from scratch.
    pub blind: bool,
    /// Ignore coverage feedback entirely. Only valid together with `blind`.
    pub no_cov: bool,
    /// Save redundant inputs too, instead of discarding them.
    pub save_all: bool,
    pub save_branch_hit_counts: bool,
    pub stats_refresh: Duration,
    pub stats_style: StatsStyle,
    pub exit_on_crash: bool,
    /// Per-trial wall-clock limit reported by the harness.
    pub run_timeout: Option<Duration>,
    /// Disable stream extension: reads past the end of an input return EOF.
    pub fixed_size: bool,
    /// Probability of drawing a parent uniformly from the whole corpus
    /// instead of the favored set.
    pub p_random_parent: f64,
    /// Probability that a split-mode mutation targets the structure stream.
    pub structure_weight: f64,
    /// Admit inputs whose run grows cumulative Shannon diversity by at
    /// least `diversity_epsilon`, even without branch novelty.
    pub admit_on_diversity_gain: bool,
    pub diversity_epsilon: f64,
    /// How often the reported Hill numbers are recomputed.
    pub diversity_refresh: Duration,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Zest,
            out_dir: PathBuf::from("fuzz-out"),
            seeds_dir: None,
            duration: None,
            trials: None,
            random_seed: 0,
            blind: false,
            no_cov: false,
            save_all: false,
            save_branch_hit_counts: false,
            stats_refresh: Duration::from_millis(300),
            stats_style: StatsStyle::Afl,
            exit_on_crash: false,
            run_timeout: None,
            fixed_size: false,
            p_random_parent: 0.1,
            structure_weight: 0.5,
            admit_on_diversity_gain: false,
            diversity_epsilon: 1e-3,
            diversity_refresh: Duration::from_secs(5),
        }
    }
}

impl FuzzConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.no_cov && !self.blind {
            return Err(ConfigError::NoCovRequiresBlind);
        }
        for (name, value) in [
            ("p_random_parent", self.p_random_parent),
            ("structure_weight", self.structure_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightOutOfRange { name, value });
            }
        }
        if self.diversity_epsilon < 0.0 {
            return Err(ConfigError::WeightOutOfRange {
                name: "diversity_epsilon",
                value: self.diversity_epsilon,
            });
        }
        Ok(())
    }
}

/// Parses `[Nh][Nm][Ns]` durations; a bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_owned());
    if s.is_empty() {
        return Err(invalid());
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = s.parse().map_err(|_| invalid())?;
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    let mut last_unit = 0u8;
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let per_unit = match ch {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        // Units must appear at most once, in h, m, s order.
        let rank = match ch {
            'h' => 1,
            'm' => 2,
            _ => 3,
        };
        if digits.is_empty() || rank <= last_unit {
            return Err(invalid());
        }
        last_unit = rank;
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        total = total
            .checked_add(n.checked_mul(per_unit).ok_or_else(invalid)?)
            .ok_or_else(invalid)?;
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown engine: {0:?} (expected zest, zeal or bedivfuzz)")]
    UnknownEngine(String),

    #[error("unknown stats style: {0:?} (expected afl or libfuzzer)")]
    UnknownStatsStyle(String),

    #[error("noCov is only meaningful together with blind")]
    NoCovRequiresBlind,

    #[error("invalid duration {0:?} (expected [Nh][Nm][Ns])")]
    InvalidDuration(String),

    #[error("{name} = {value} is out of range")]
    WeightOutOfRange { name: &'static str, value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(90 * 60)
        );
        assert_eq!(
            parse_duration("2h5m10s").unwrap(),
            Duration::from_secs(2 * 3600 + 5 * 60 + 10)
        );
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn bad_durations_rejected() {
        for bad in ["", "h", "10x", "1m2h", "1h1h", "5m3"] {
            assert!(parse_duration(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn no_cov_requires_blind() {
        let config = FuzzConfig {
            no_cov: true,
            ..FuzzConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCovRequiresBlind));

        let config = FuzzConfig {
            no_cov: true,
            blind: true,
            ..FuzzConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn engine_names_round_trip() {
        for engine in [EngineKind::Zest, EngineKind::Zeal, EngineKind::BeDivFuzz] {
            assert_eq!(engine.to_string().parse::<EngineKind>().unwrap(), engine);
        }
        assert!("zesty".parse::<EngineKind>().is_err());
    }
}
