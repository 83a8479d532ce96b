use serde::{Deserialize, Serialize};

/*
 Events carried by a sequence block. The engine only interprets RF, ADC and
 trapezoidal gradient events; everything else in a block reduces to its
 duration.
 */

/// RF event. The magnitude shape is normalized to a unit peak, so the samples
/// have to be scaled by `amplitude` on every occurrence of the shape.
/// Phase shape samples are stored in radians.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RfEvent {
    pub amplitude:f64,    // peak B1 amplitude [Hz]
    pub freq_offset:f64,  // offset from f0 [Hz]
    pub phase_offset:f64, // [rad]
    pub delay_us:u64,     // dead time before the first shape sample
    pub mag_shape:u32,
    pub phase_shape:u32,
    pub time_shape:u32,   // 0 for formats below 1.4
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradKind {
    Trapezoid,
    Arbitrary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradEvent {
    pub kind:GradKind,
    pub amplitude:f64, // [Hz/m]
    pub rise_us:u64,
    pub flat_us:u64,
    pub fall_us:u64,
    pub delay_us:u64,
}

impl GradEvent {
    pub fn trapezoid(amplitude:f64, rise_us:u64, flat_us:u64, fall_us:u64) -> GradEvent {
        GradEvent {
            kind:GradKind::Trapezoid,
            amplitude,
            rise_us,
            flat_us,
            fall_us,
            delay_us:0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdcEvent {
    pub num_samples:u32,
    pub dwell_ns:u64,
    pub delay_us:u64,
}

impl AdcEvent {
    pub fn new(num_samples:u32, dwell_ns:u64) -> AdcEvent {
        AdcEvent {
            num_samples,
            dwell_ns,
            delay_us:0,
        }
    }
}
