//! Size-based retention
//!
//! Maps a resource size to how long it is kept. Small files get the
//! maximum age; retention falls off along a cubic curve and reaches the
//! minimum age at the configured size threshold, staying there for
//! anything larger.
//!
//! ```text
//! ratio = size_mib / max_size_mib - 1
//! days  = clamp(min_age + (min_age - max_age) * ratio^3, min_age, max_age)
//! ```
//!
//! The same calculator is used at upload time (to stamp an expiry), by the
//! management routes (to bound explicit expiries) and by the sweeper (for
//! records without an explicit expiry).

pub mod sweeper;

pub use sweeper::{ExpirationSweeper, SweepReport};

use chrono::{DateTime, Duration, Utc};

use crate::catalog::ResourceRecord;
use crate::config::RetentionConfig;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Invalid retention configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetentionError {
    #[error("Ages must be finite and non-negative (min: {min}, max: {max})")]
    InvalidAge { min: f64, max: f64 },

    #[error("Minimum age {min} exceeds maximum age {max}")]
    InvertedAges { min: f64, max: f64 },

    #[error("Size threshold must be positive, got {0} MiB")]
    InvalidThreshold(f64),
}

/// Immutable retention constants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    min_age_days: f64,
    max_age_days: f64,
    max_size_mib: f64,
}

impl RetentionPolicy {
    pub fn new(min_age_days: f64, max_age_days: f64, max_size_mib: f64) -> Result<Self, RetentionError> {
        let ages_ok = min_age_days.is_finite()
            && max_age_days.is_finite()
            && min_age_days >= 0.0
            && max_age_days >= 0.0;
        if !ages_ok {
            return Err(RetentionError::InvalidAge {
                min: min_age_days,
                max: max_age_days,
            });
        }
        if min_age_days > max_age_days {
            return Err(RetentionError::InvertedAges {
                min: min_age_days,
                max: max_age_days,
            });
        }
        if !(max_size_mib.is_finite() && max_size_mib > 0.0) {
            return Err(RetentionError::InvalidThreshold(max_size_mib));
        }

        Ok(Self {
            min_age_days,
            max_age_days,
            max_size_mib,
        })
    }

    pub fn from_config(config: &RetentionConfig) -> Result<Self, RetentionError> {
        Self::new(config.min_age_days, config.max_age_days, config.max_size_mib)
    }

    pub fn min_age_days(&self) -> f64 {
        self.min_age_days
    }

    pub fn max_age_days(&self) -> f64 {
        self.max_age_days
    }

    pub fn max_size_mib(&self) -> f64 {
        self.max_size_mib
    }
}

/// Computes retention windows and expiry decisions
#[derive(Debug, Clone, Copy)]
pub struct RetentionCalculator {
    policy: RetentionPolicy,
}

impl RetentionCalculator {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Retention in fractional days for a size in bytes
    pub fn retention_days(&self, size_bytes: u64) -> f64 {
        let p = &self.policy;
        let size_mib = size_bytes as f64 / BYTES_PER_MIB;
        let ratio = size_mib / p.max_size_mib - 1.0;
        let delta = (p.min_age_days - p.max_age_days) * ratio.powi(3);
        (p.min_age_days + delta).clamp(p.min_age_days, p.max_age_days)
    }

    /// Retention window for a size in bytes; sub-day precision is kept
    pub fn calculate_retention(&self, size_bytes: u64) -> Duration {
        let millis = (self.retention_days(size_bytes) * MILLIS_PER_DAY).round() as i64;
        Duration::milliseconds(millis)
    }

    /// Expiry for content of `size_bytes` stored now
    pub fn get_expiration_date(&self, size_bytes: u64) -> DateTime<Utc> {
        self.expiration_from(size_bytes, Utc::now())
    }

    pub fn expiration_from(&self, size_bytes: u64, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.calculate_retention(size_bytes)
    }

    /// Latest explicit expiry a client may request for content stored at `now`
    pub fn max_expiry(&self, size_bytes: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        self.expiration_from(size_bytes, now)
    }

    /// Whether an explicit expiry falls within `[now, max_expiry(size)]`
    pub fn is_valid_expiry(&self, requested: DateTime<Utc>, size_bytes: u64, now: DateTime<Utc>) -> bool {
        requested >= now && requested <= self.max_expiry(size_bytes, now)
    }

    /// The requested expiry when valid, otherwise the computed one
    pub fn resolve_expiry(
        &self,
        requested: Option<DateTime<Utc>>,
        size_bytes: u64,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match requested {
            Some(at) if self.is_valid_expiry(at, size_bytes, now) => at,
            Some(at) => {
                tracing::debug!(
                    requested = %at,
                    size = size_bytes,
                    "Requested expiry out of range, using computed retention"
                );
                self.expiration_from(size_bytes, now)
            }
            None => self.expiration_from(size_bytes, now),
        }
    }

    /// Whether a record is past its retention
    ///
    /// An explicit `expires_at` is authoritative. Without one the window is
    /// computed from the upload date and size.
    pub fn check_expired(&self, record: &ResourceRecord, now: DateTime<Utc>) -> bool {
        match record.expires_at {
            Some(expires_at) => now > expires_at,
            None => now > self.expiration_from(record.size, record.upload_date),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn calculator() -> RetentionCalculator {
        RetentionCalculator::new(RetentionPolicy::new(1.0, 30.0, 250.0).unwrap())
    }

    fn file_record(size: u64, upload_date: DateTime<Utc>) -> ResourceRecord {
        let mut rec = ResourceRecord::new_file(
            "abc".to_string(),
            "tok".to_string(),
            "a.bin".to_string(),
            size,
            "application/octet-stream".to_string(),
        );
        rec.upload_date = upload_date;
        rec
    }

    #[test]
    fn test_empty_file_gets_max_age() {
        assert_eq!(calculator().retention_days(0), 30.0);
    }

    #[test]
    fn test_threshold_gets_exactly_min_age() {
        // ratio is zero at the threshold, so the cubic term vanishes
        let calc = calculator();
        assert_eq!(calc.retention_days(250 * MIB), 1.0);
        assert_eq!(calc.calculate_retention(250 * MIB), Duration::days(1));
    }

    #[test]
    fn test_documented_examples() {
        let calc = calculator();
        let small = calc.retention_days(MIB);
        assert!((small - 30.0).abs() < 0.5, "1 MiB gave {}", small);

        let large = calc.retention_days(500 * MIB);
        assert!((large - 1.0).abs() < 1e-9, "500 MiB gave {}", large);
    }

    #[test]
    fn test_always_within_bounds() {
        let calc = calculator();
        let sizes = [
            0,
            1,
            MIB,
            100 * MIB,
            249 * MIB,
            250 * MIB,
            251 * MIB,
            250 * 1000 * MIB,
            u64::MAX,
        ];
        for size in sizes {
            let days = calc.retention_days(size);
            assert!((1.0..=30.0).contains(&days), "size {} gave {}", size, days);
        }
    }

    #[test]
    fn test_monotonically_non_increasing() {
        let calc = calculator();
        let mut previous = f64::INFINITY;
        for mib in (0..=600).step_by(10) {
            let days = calc.retention_days(mib * MIB);
            assert!(days <= previous);
            previous = days;
        }
    }

    #[test]
    fn test_sub_day_precision_is_kept() {
        let retention = calculator().calculate_retention(125 * MIB);
        // 1 + 29 * 0.125 = 4.625 days
        assert_eq!(retention, Duration::minutes(4 * 24 * 60 + 15 * 60));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetentionPolicy::new(30.0, 1.0, 250.0).is_err());
        assert!(RetentionPolicy::new(1.0, 30.0, 0.0).is_err());
        assert!(RetentionPolicy::new(-1.0, 30.0, 250.0).is_err());
        assert!(RetentionPolicy::new(f64::NAN, 30.0, 250.0).is_err());
    }

    #[test]
    fn test_resolve_expiry() {
        let calc = calculator();
        let now = Utc::now();
        let size = 250 * MIB;

        let valid = now + Duration::hours(12);
        assert_eq!(calc.resolve_expiry(Some(valid), size, now), valid);

        // Past the one day allowed at the threshold
        let too_late = now + Duration::days(2);
        assert_eq!(calc.resolve_expiry(Some(too_late), size, now), now + Duration::days(1));

        let past = now - Duration::hours(1);
        assert_eq!(calc.resolve_expiry(Some(past), size, now), now + Duration::days(1));

        assert_eq!(calc.resolve_expiry(None, size, now), now + Duration::days(1));
    }

    #[test]
    fn test_check_expired_computed() {
        let calc = calculator();
        let now = Utc::now();

        let fresh = file_record(250 * MIB, now - Duration::hours(23));
        assert!(!calc.check_expired(&fresh, now));

        let stale = file_record(250 * MIB, now - Duration::hours(25));
        assert!(calc.check_expired(&stale, now));

        let small_old = file_record(0, now - Duration::days(29));
        assert!(!calc.check_expired(&small_old, now));
    }

    #[test]
    fn test_check_expired_explicit() {
        let calc = calculator();
        let now = Utc::now();

        let mut rec = file_record(0, now);
        rec.expires_at = Some(now - Duration::seconds(1));
        assert!(calc.check_expired(&rec, now));

        // An explicit future expiry wins over the computed window
        let mut rec = file_record(250 * MIB, now - Duration::days(3));
        rec.expires_at = Some(now + Duration::hours(1));
        assert!(!calc.check_expired(&rec, now));
    }
}
