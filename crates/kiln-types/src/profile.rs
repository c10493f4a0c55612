//! Firing profiles: ordered `(elapsed_seconds, target_temperature)` keyframes
//! with piecewise-linear interpolation between them.
//!
//! ```rust
//! use kiln_types::Profile;
//!
//! let profile = Profile::new("bisque", vec![(0.0, 70.0), (60.0, 500.0)]).unwrap();
//! assert_eq!(profile.duration(), 60.0);
//! assert_eq!(profile.target_at(30.0), Some(285.0));
//! assert_eq!(profile.target_at(90.0), None); // finished
//! ```

use serde::{Deserialize, Serialize};

use crate::KilnError;

/// An immutable firing schedule.
///
/// Keyframes are sorted by elapsed time on construction.  Duplicate
/// timestamps are kept as-is; interpolating across such a zero-width segment
/// yields a target of `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileDocument", into = "ProfileDocument")]
pub struct Profile {
    name: String,
    keyframes: Vec<(f64, f64)>,
}

/// On-disk / on-wire shape: `{"name": "...", "data": [[t, temp], ...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileDocument {
    name: String,
    data: Vec<(f64, f64)>,
}

impl TryFrom<ProfileDocument> for Profile {
    type Error = KilnError;

    fn try_from(doc: ProfileDocument) -> Result<Self, Self::Error> {
        Profile::new(doc.name, doc.data)
    }
}

impl From<Profile> for ProfileDocument {
    fn from(p: Profile) -> Self {
        Self {
            name: p.name,
            data: p.keyframes,
        }
    }
}

impl Profile {
    /// Build a profile, sorting `keyframes` by elapsed time.
    ///
    /// # Errors
    ///
    /// [`KilnError::InvalidProfile`] when there are no keyframes, a timestamp
    /// is negative, or any value is not finite.
    pub fn new(name: impl Into<String>, mut keyframes: Vec<(f64, f64)>) -> Result<Self, KilnError> {
        let name = name.into();
        if keyframes.is_empty() {
            return Err(KilnError::InvalidProfile(format!("{name}: no keyframes")));
        }
        if let Some((t, temp)) = keyframes
            .iter()
            .find(|(t, temp)| !t.is_finite() || !temp.is_finite() || *t < 0.0)
        {
            return Err(KilnError::InvalidProfile(format!(
                "{name}: bad keyframe ({t}, {temp})"
            )));
        }
        keyframes.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(Self { name, keyframes })
    }

    /// Parse the JSON profile document format.
    pub fn from_json(json: &str) -> Result<Self, KilnError> {
        serde_json::from_str(json).map_err(|e| KilnError::Serialization(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keyframes(&self) -> &[(f64, f64)] {
        &self.keyframes
    }

    /// Total schedule length in seconds (timestamp of the last keyframe).
    pub fn duration(&self) -> f64 {
        self.keyframes.last().map_or(0.0, |(t, _)| *t)
    }

    /// Target temperature `elapsed_seconds` into the run.
    ///
    /// Returns `None` once `elapsed_seconds` is past [`duration`](Self::duration),
    /// which the engine treats as "schedule finished".  Times before the
    /// first keyframe clamp to its temperature.
    pub fn target_at(&self, elapsed_seconds: f64) -> Option<f64> {
        if elapsed_seconds > self.duration() {
            return None;
        }
        let (first_t, first_temp) = self.keyframes[0];
        if elapsed_seconds <= first_t {
            return Some(first_temp);
        }

        // First keyframe strictly after `elapsed_seconds`; at exactly the
        // duration there is none and the last segment is used.
        let next = self
            .keyframes
            .iter()
            .position(|(t, _)| elapsed_seconds < *t)
            .unwrap_or(self.keyframes.len() - 1);
        let (t0, temp0) = self.keyframes[next - 1];
        let (t1, temp1) = self.keyframes[next];

        let span = t1 - t0;
        if span == 0.0 {
            return Some(0.0);
        }
        Some(temp0 + (temp1 - temp0) * (elapsed_seconds - t0) / span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Profile {
        Profile::new("ramp", vec![(0.0, 70.0), (60.0, 500.0)]).unwrap()
    }

    #[test]
    fn interpolates_midpoint() {
        assert_eq!(ramp().target_at(30.0), Some(285.0));
    }

    #[test]
    fn start_and_clamp_below_range() {
        let p = ramp();
        assert_eq!(p.target_at(0.0), Some(70.0));
        assert_eq!(p.target_at(-5.0), Some(70.0));
    }

    #[test]
    fn past_duration_is_finished() {
        assert_eq!(ramp().target_at(90.0), None);
    }

    #[test]
    fn exactly_at_duration_returns_last_keyframe() {
        assert_eq!(ramp().target_at(60.0), Some(500.0));
    }

    #[test]
    fn first_keyframe_after_zero_clamps_until_reached() {
        let p = Profile::new("late", vec![(10.0, 100.0), (20.0, 200.0)]).unwrap();
        assert_eq!(p.target_at(5.0), Some(100.0));
        assert_eq!(p.target_at(15.0), Some(150.0));
    }

    #[test]
    fn degenerate_segment_yields_zero() {
        let p = Profile::new("dup", vec![(0.0, 100.0), (30.0, 200.0), (30.0, 300.0), (60.0, 300.0)])
            .unwrap();
        assert_eq!(p.target_at(30.0), Some(300.0));
        let q = Profile::new("zero", vec![(0.0, 100.0), (0.0, 200.0)]).unwrap();
        assert_eq!(q.target_at(0.0), Some(100.0));
        let r = Profile::new("only-dup", vec![(0.0, 50.0), (10.0, 100.0), (10.0, 200.0)]).unwrap();
        assert_eq!(r.target_at(10.0), Some(0.0));
    }

    #[test]
    fn multi_segment_profile() {
        let p = Profile::new(
            "cone-06",
            vec![(0.0, 70.0), (3600.0, 1000.0), (7200.0, 1000.0), (9000.0, 1800.0)],
        )
        .unwrap();
        assert_eq!(p.duration(), 9000.0);
        assert_eq!(p.target_at(5400.0), Some(1000.0));
        assert_eq!(p.target_at(8100.0), Some(1400.0));
    }

    #[test]
    fn keyframes_are_sorted_on_construction() {
        let p = Profile::new("unsorted", vec![(60.0, 500.0), (0.0, 70.0)]).unwrap();
        assert_eq!(p.keyframes(), &[(0.0, 70.0), (60.0, 500.0)]);
        assert_eq!(p.duration(), 60.0);
    }

    #[test]
    fn rejects_empty_and_invalid_keyframes() {
        assert!(Profile::new("empty", vec![]).is_err());
        assert!(Profile::new("neg", vec![(-1.0, 70.0)]).is_err());
        assert!(Profile::new("nan", vec![(0.0, f64::NAN)]).is_err());
    }

    #[test]
    fn parses_profile_document() {
        let p = Profile::from_json(r#"{"name":"glaze","data":[[0,65],[120,300]]}"#).unwrap();
        assert_eq!(p.name(), "glaze");
        assert_eq!(p.duration(), 120.0);

        let err = Profile::from_json(r#"{"name":"glaze","data":[]}"#).unwrap_err();
        assert!(matches!(err, KilnError::Serialization(_)));
    }
}
