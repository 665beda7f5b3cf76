//! Knob value to OBS volume mapping

use serde::{Deserialize, Serialize};

/// How a 0-127 knob value maps onto a volume multiplier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeCurve {
    /// value / 127
    Linear,
    /// OBS mixer fader law: the knob position is read as a fader position
    /// and converted through the same dB segments OBS draws
    #[default]
    Fader,
}

impl VolumeCurve {
    /// Volume multiplier (0.0-1.0) for a knob value
    pub fn apply(&self, value: u8) -> f32 {
        let position = f64::from(value.min(127)) / 127.0;
        let volume = match self {
            VolumeCurve::Linear => position,
            VolumeCurve::Fader => db_to_mul(fader_position_to_db(position)),
        };
        volume as f32
    }
}

fn db_to_mul(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Piecewise-linear fader position (0-1) to dB
fn fader_position_to_db(y: f64) -> f64 {
    // (offset dB, span dB, segment width, segment start)
    let segment = |a1: f64, d: f64, m: f64, a2: f64| ((y - a2) / m) * d - a1;

    if y >= 1.0 {
        0.0
    } else if y >= 0.75 {
        segment(9.0, 9.0, 0.25, 0.75)
    } else if y >= 0.5 {
        segment(20.0, 11.0, 0.25, 0.5)
    } else if y >= 0.3 {
        segment(30.0, 10.0, 0.2, 0.3)
    } else if y >= 0.15 {
        segment(40.0, 10.0, 0.15, 0.15)
    } else if y >= 0.075 {
        segment(50.0, 10.0, 0.075, 0.075)
    } else if y >= 0.025 {
        segment(60.0, 10.0, 0.05, 0.025)
    } else if y > 0.0 {
        segment(150.0, 90.0, 0.025, 0.0)
    } else {
        -15000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fader_endpoints() {
        assert_eq!(VolumeCurve::Fader.apply(127), 1.0);
        assert_eq!(VolumeCurve::Fader.apply(0), 0.0);
        assert_eq!(VolumeCurve::Linear.apply(127), 1.0);
        assert_eq!(VolumeCurve::Linear.apply(0), 0.0);
    }

    #[test]
    fn test_fader_segments_join() {
        for (boundary, db) in [
            (0.75, -9.0),
            (0.5, -20.0),
            (0.3, -30.0),
            (0.15, -40.0),
            (0.075, -50.0),
            (0.025, -60.0),
        ] {
            let below = fader_position_to_db(boundary - 1e-9);
            assert!((fader_position_to_db(boundary) - db).abs() < 1e-9);
            assert!((below - db).abs() < 1e-5, "gap at {}: {}", boundary, below);
        }
    }

    #[test]
    fn test_curves_are_monotonic() {
        for curve in [VolumeCurve::Linear, VolumeCurve::Fader] {
            let values: Vec<f32> = (0..=127).map(|v| curve.apply(v)).collect();
            assert!(values.windows(2).all(|w| w[0] <= w[1]), "{:?}", curve);
        }
    }

    #[test]
    fn test_fader_midpoint_is_attenuated() {
        // Half travel is -20 dB on the OBS fader
        let half = VolumeCurve::Fader.apply(64);
        assert!(half > 0.09 && half < 0.12, "{}", half);
    }
}
