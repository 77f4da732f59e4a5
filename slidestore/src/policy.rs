//! Retention policy configuration.
//!
//! A retention policy is an ordered list of tiers, each a `(span, interval)`
//! pair. Every series keeps one slide per tier of its kind's policy: the
//! finest tier answers recent, detailed queries and the coarser tiers answer
//! long-range ones. Policies are loaded once at startup.
//!
//! Durations are written in seconds in JSON files:
//!
//! ```json
//! {
//!   "basic": [
//!     { "span": 600, "interval": 5 },
//!     { "span": 3600, "interval": 60 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, Result};
use crate::slide::SlideOptions;
use crate::values::{MetricKind, Mode};

/// Maximum number of samples a single tier may retain.
///
/// Guards against misconfigured spans and intervals blowing up memory.
pub const MAX_SAMPLES_PER_TIER: u64 = 1_000_000;

/// Configuration for a single resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TierConfig {
    /// How long samples stay observable.
    #[serde(with = "duration_serde")]
    pub span: Duration,

    /// Bucket width.
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl TierConfig {
    /// Creates a validated tier configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if the configuration is invalid.
    pub fn new(span: Duration, interval: Duration) -> Result<Self> {
        let config = Self { span, interval };
        config.validate()?;
        Ok(config)
    }

    /// Validates this tier configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidTierConfig`] for a zero interval or a
    /// span shorter than one interval, and [`PolicyError::TooManySamples`] if
    /// the tier would retain more than [`MAX_SAMPLES_PER_TIER`] samples.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms() == 0 {
            return Err(PolicyError::InvalidTierConfig {
                reason: "interval must be at least one millisecond".to_string(),
            }
            .into());
        }

        if self.span < self.interval {
            return Err(PolicyError::InvalidTierConfig {
                reason: format!(
                    "span ({:?}) must be >= interval ({:?})",
                    self.span, self.interval
                ),
            }
            .into());
        }

        let sample_count = self.sample_count();
        if sample_count > MAX_SAMPLES_PER_TIER {
            return Err(PolicyError::TooManySamples {
                sample_count,
                max_samples: MAX_SAMPLES_PER_TIER,
                span: self.span,
                interval: self.interval,
            }
            .into());
        }

        Ok(())
    }

    /// Returns the number of buckets the span covers.
    pub fn sample_count(&self) -> u64 {
        match self.interval_ms() {
            0 => 0,
            interval => self.span_ms() / interval,
        }
    }

    /// Returns the span in milliseconds.
    pub fn span_ms(&self) -> u64 {
        u64::try_from(self.span.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the options for a slide of this tier.
    ///
    /// The sample cap is one more than the number of buckets in the span so
    /// a full window is observable even when it straddles a bucket boundary.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use slidestore::policy::TierConfig;
    /// use slidestore::values::Mode;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let tier = TierConfig::new(Duration::from_secs(600), Duration::from_secs(5))?;
    /// let options = tier.slide_options(Mode::Cumulative);
    /// assert_eq!(options.interval, 5_000);
    /// assert_eq!(options.max_n, Some(121));
    /// # Ok(())
    /// # }
    /// ```
    pub fn slide_options(&self, mode: Mode) -> SlideOptions {
        let max_n = usize::try_from(self.sample_count().saturating_add(1)).unwrap_or(usize::MAX);
        SlideOptions {
            interval: self.interval_ms(),
            max_n: Some(max_n),
            mode,
            arity: None,
        }
    }
}

/// Named retention policies.
///
/// # Example
///
/// ```rust
/// use slidestore::policy::RetentionPolicies;
/// use slidestore::values::MetricKind;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policies = RetentionPolicies::default();
/// let tiers = policies.tiers_for(MetricKind::CoarseNodeStats)?;
/// assert_eq!(tiers.len(), 4);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionPolicies {
    policies: BTreeMap<String, Vec<TierConfig>>,
}

impl RetentionPolicies {
    /// Creates validated policies from a name to tiers map.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if any policy is invalid.
    pub fn new(policies: BTreeMap<String, Vec<TierConfig>>) -> Result<Self> {
        let policies = Self { policies };
        policies.validate()?;
        Ok(policies)
    }

    /// Parses and validates policies from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] for malformed JSON and any validation
    /// error otherwise.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let policies: Self = serde_json::from_str(json).map_err(PolicyError::from)?;
        policies.validate()?;
        Ok(policies)
    }

    /// Loads and validates policies from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Read`] if the file cannot be read, otherwise
    /// the errors of [`RetentionPolicies::from_json_str`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!("loading retention policies from {}", path.display());
        Self::from_json_str(&json)
    }

    /// Validates every policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NoTiers`] for an empty policy,
    /// [`PolicyError::TiersNotOrdered`] unless intervals strictly increase,
    /// and any tier validation error.
    pub fn validate(&self) -> Result<()> {
        for (name, tiers) in &self.policies {
            if tiers.is_empty() {
                return Err(PolicyError::NoTiers {
                    policy: name.clone(),
                }
                .into());
            }

            for tier in tiers {
                tier.validate()?;
            }

            if tiers.windows(2).any(|pair| pair[0].interval >= pair[1].interval) {
                return Err(PolicyError::TiersNotOrdered {
                    policy: name.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Returns the tiers of a named policy.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] if no such policy exists.
    pub fn tiers(&self, name: &str) -> Result<&[TierConfig]> {
        self.policies
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                PolicyError::UnknownPolicy {
                    policy: name.to_string(),
                }
                .into()
            })
    }

    /// Returns the tiers a metric kind's slides are created with.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownPolicy`] if the kind's policy is missing.
    pub fn tiers_for(&self, kind: MetricKind) -> Result<&[TierConfig]> {
        self.tiers(kind.policy())
    }

    /// Returns the configured policy names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Renders the policies as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Parse`] if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PolicyError::from(e).into())
    }
}

impl Default for RetentionPolicies {
    /// The broker's stock policies: `basic` for per-object statistics,
    /// `detailed` for fine-grained message rates, `global` for node and
    /// cluster-wide statistics.
    fn default() -> Self {
        let tier = |span, interval| TierConfig {
            span: Duration::from_secs(span),
            interval: Duration::from_secs(interval),
        };

        let mut policies = BTreeMap::new();
        policies.insert("basic".to_string(), vec![tier(600, 5), tier(3_600, 60)]);
        policies.insert("detailed".to_string(), vec![tier(600, 5)]);
        policies.insert(
            "global".to_string(),
            vec![
                tier(605, 5),
                tier(3_660, 60),
                tier(29_400, 600),
                tier(86_400, 1_800),
            ],
        );
        Self { policies }
    }
}

/// Picks the tier a query reads from.
///
/// Range queries use the coarsest tier whose interval is no wider than the
/// range increment. Instant queries, and ranges finer than every tier, use
/// the finest tier.
///
/// # Examples
///
/// ```rust
/// use slidestore::policy::{select_tier, RetentionPolicies};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policies = RetentionPolicies::default();
/// let tiers = policies.tiers("global")?;
///
/// assert_eq!(select_tier(tiers, None), 0);
/// assert_eq!(select_tier(tiers, Some(60_000)), 1);
/// assert_eq!(select_tier(tiers, Some(1_000)), 0);
/// # Ok(())
/// # }
/// ```
pub fn select_tier(tiers: &[TierConfig], incr: Option<u64>) -> usize {
    let Some(incr) = incr else {
        return 0;
    };
    tiers
        .iter()
        .rposition(|tier| tier.interval_ms() <= incr)
        .unwrap_or(0)
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds (f64) for human readability
/// in JSON configuration files.
mod duration_serde {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}
