// Unit conversions between physical units and native controller units
// Distance (m), linear velocity (m/s) and angular velocity (rad/s) map to
// encoder counts and counts per native velocity interval.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::motion::SetpointKind;

/// How a controller reports its encoder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderScale {
    /// Encoder counts per revolution of the motor shaft
    pub counts_per_rev: f64,
    /// Native velocity intervals per second (10 for ticks/100ms, 1/60 for RPM)
    pub intervals_per_second: f64,
}

impl EncoderScale {
    pub const fn new(counts_per_rev: f64, intervals_per_second: f64) -> Self {
        Self {
            counts_per_rev,
            intervals_per_second,
        }
    }
}

/// Convert a distance to encoder ticks
///
/// # Arguments
/// * `distance` - Distance traveled by the wheel surface in meters
/// * `gearing` - Gear ratio (output to input) as a decimal
/// * `wheel_diameter` - Wheel diameter in meters
/// * `counts_per_rev` - Encoder counts per input revolution
pub fn distance_to_ticks(distance: f64, gearing: f64, wheel_diameter: f64, counts_per_rev: f64) -> f64 {
    distance / (PI * wheel_diameter) * gearing * counts_per_rev
}

/// Convert encoder ticks back to a distance in meters
pub fn ticks_to_distance(ticks: f64, gearing: f64, wheel_diameter: f64, counts_per_rev: f64) -> f64 {
    ticks / counts_per_rev / gearing * (PI * wheel_diameter)
}

/// Convert a linear velocity (m/s) to ticks per native interval
pub fn linear_velocity_to_native(velocity: f64, gearing: f64, wheel_diameter: f64, scale: EncoderScale) -> f64 {
    distance_to_ticks(velocity, gearing, wheel_diameter, scale.counts_per_rev) / scale.intervals_per_second
}

/// Convert ticks per native interval to a linear velocity (m/s)
pub fn native_to_linear_velocity(native: f64, gearing: f64, wheel_diameter: f64, scale: EncoderScale) -> f64 {
    ticks_to_distance(native * scale.intervals_per_second, gearing, wheel_diameter, scale.counts_per_rev)
}

/// Convert an angular velocity of the output shaft (rad/s) to ticks per native interval
pub fn angular_velocity_to_native(omega: f64, gearing: f64, scale: EncoderScale) -> f64 {
    (omega / (2.0 * PI)) * gearing * scale.counts_per_rev / scale.intervals_per_second
}

/// Convert ticks per native interval to an angular velocity (rad/s)
pub fn native_to_angular_velocity(native: f64, gearing: f64, scale: EncoderScale) -> f64 {
    native * scale.intervals_per_second / scale.counts_per_rev / gearing * (2.0 * PI)
}

/// Mechanism geometry bundled with the encoder it is measured by
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub gearing: f64,
    pub wheel_diameter: f64,
    pub scale: EncoderScale,
}

impl Conversion {
    pub fn new(gearing: f64, wheel_diameter: f64, scale: EncoderScale) -> Self {
        Self {
            gearing,
            wheel_diameter,
            scale,
        }
    }

    /// Physical value of the given kind -> native controller units
    pub fn to_native(&self, value: f64, kind: SetpointKind) -> f64 {
        match kind {
            SetpointKind::Position => {
                distance_to_ticks(value, self.gearing, self.wheel_diameter, self.scale.counts_per_rev)
            }
            SetpointKind::LinearVelocity => {
                linear_velocity_to_native(value, self.gearing, self.wheel_diameter, self.scale)
            }
            SetpointKind::AngularVelocity => angular_velocity_to_native(value, self.gearing, self.scale),
        }
    }

    /// Native controller units -> physical value of the given kind
    pub fn from_native(&self, native: f64, kind: SetpointKind) -> f64 {
        match kind {
            SetpointKind::Position => {
                ticks_to_distance(native, self.gearing, self.wheel_diameter, self.scale.counts_per_rev)
            }
            SetpointKind::LinearVelocity => {
                native_to_linear_velocity(native, self.gearing, self.wheel_diameter, self.scale)
            }
            SetpointKind::AngularVelocity => native_to_angular_velocity(native, self.gearing, self.scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TALON: EncoderScale = EncoderScale::new(2048.0, 10.0);

    #[test]
    fn test_one_wheel_turn_is_gearing_times_cpr() {
        // One circumference of travel with 10:1 gearing on a 2048 cpr encoder
        let d = 0.1016;
        let ticks = distance_to_ticks(PI * d, 10.0, d, 2048.0);
        assert!((ticks - 20480.0).abs() < 1e-6, "got {}", ticks);
    }

    #[test]
    fn test_distance_round_trip_within_one_tick() {
        let cases = [(1.0, 0.1016), (8.45, 0.1524), (0.5, 0.05), (120.0, 0.2)];
        for &(gearing, diameter) in &cases {
            let tick = ticks_to_distance(1.0, gearing, diameter, 2048.0);
            for &x in &[-3.2, 0.0, 0.001, 1.0, 17.25] {
                // Controllers take integer ticks, so round like the wire would
                let ticks = distance_to_ticks(x, gearing, diameter, 2048.0).round();
                let back = ticks_to_distance(ticks, gearing, diameter, 2048.0);
                assert!(
                    (back - x).abs() <= tick,
                    "x={} g={} d={} came back as {}",
                    x,
                    gearing,
                    diameter,
                    back
                );
            }
        }
    }

    #[test]
    fn test_velocity_interval_scaling() {
        // ticks/100ms must be a tenth of ticks/s
        let per_second = distance_to_ticks(2.0, 6.0, 0.1, 2048.0);
        let native = linear_velocity_to_native(2.0, 6.0, 0.1, TALON);
        assert!((native * 10.0 - per_second).abs() < 1e-9);
        let back = native_to_linear_velocity(native, 6.0, 0.1, TALON);
        assert!((back - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_angular_velocity_in_rpm() {
        // 2*pi rad/s at the output with 1:1 gearing is 60 RPM
        let rpm_scale = EncoderScale::new(1.0, 1.0 / 60.0);
        let rpm = angular_velocity_to_native(2.0 * PI, 1.0, rpm_scale);
        assert!((rpm - 60.0).abs() < 1e-9, "got {}", rpm);
        let back = native_to_angular_velocity(rpm, 1.0, rpm_scale);
        assert!((back - 2.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_conversion_dispatches_by_kind() {
        let conv = Conversion::new(10.0, 0.1, TALON);
        for kind in SetpointKind::ALL {
            let native = conv.to_native(1.5, kind);
            assert!((conv.from_native(native, kind) - 1.5).abs() < 1e-9, "{:?}", kind);
        }
    }
}
