/*
 Decoding of shaped RF pulses into compact sample lists.

 Sequences sample every pulse at the RF raster (1 us for old formats), so a
 100 ms saturation pulse arrives as 1e5 samples. Most of those are redundant:
 consecutive equal amplitude/phase samples collapse into one sample with a
 longer timestep. Pulses are keyed by their shape ids and decoded once; the
 per-block amplitude scale and phase/frequency offsets are applied by the
 runner on every occurrence.
 */

use std::collections::HashMap;
use log::debug;
use seq_blocks::{DecodedRf, RfEvent, Sequence};
use crate::error::SimError;

/// Identity of a decoded pulse: (magnitude, phase, time) shape ids. Dedup is
/// by id, not by sample values.
pub type PulseId = (u32, u32, u32);

/// Samples below this magnitude at the end of a pulse are ringdown
const RINGDOWN_THRESHOLD:f64 = 1e-6;

#[derive(Clone, Copy, Debug)]
pub struct PulseSample {
    pub magnitude:f64, // normalized shape magnitude
    pub phase:f64,     // [rad]
    pub timestep:f64,  // [s]
}

#[derive(Clone, Debug)]
pub struct PulseEvent {
    /// Raw sample count after the ringdown trim
    pub length:usize,
    /// Declared delay before the first sample [s]
    pub dead_time:f64,
    /// Trailing near-zero tail trimmed off the shape [s]
    pub ringdown_time:f64,
    pub samples:Vec<PulseSample>,
}

impl PulseEvent {
    /// Summed duration of the decoded samples [s]
    pub fn sample_duration(&self) -> f64 {
        self.samples.iter().map(|s| s.timestep).sum()
    }
}

pub fn pulse_id(seq:&Sequence, rf:&RfEvent) -> PulseId {
    let time_id = if seq.supports_time_shapes() { rf.time_shape } else { 0 };
    (rf.mag_shape, rf.phase_shape, time_id)
}

/// Decode every unique pulse of the sequence. Blocks sharing a pulse id are
/// decoded once.
pub fn decode_unique_pulses(
    seq:&Sequence,
    max_samples:usize,
) -> Result<HashMap<PulseId, PulseEvent>, SimError> {
    let raster = seq.rf_raster_s();
    let mut pulses = HashMap::new();
    for block in seq.blocks.iter() {
        let rf = match &block.rf {
            Some(rf) => rf,
            None => continue,
        };
        let id = pulse_id(seq, rf);
        if pulses.contains_key(&id) {
            continue;
        }
        let raw = seq.decode_rf(rf)?;
        let pulse = decode_pulse(&raw, rf, raster, max_samples);
        debug!(
            "pulse {:?}: {} raw samples -> {} samples, ringdown {:.1} us",
            id,
            raw.amplitude.len(),
            pulse.samples.len(),
            pulse.ringdown_time * 1e6
        );
        pulses.insert(id, pulse);
    }
    debug!("decoded {} unique pulse shapes", pulses.len());
    Ok(pulses)
}

fn decode_pulse(raw:&DecodedRf, rf:&RfEvent, raster:f64, max_samples:usize) -> PulseEvent {
    let mut amplitude = raw.amplitude.clone();
    let mut phase = raw.phase.clone();

    // near-zero samples at the end of the shape are RF ringdown, not drive
    let mut length = amplitude.len();
    while length > 0 && amplitude[length - 1].abs() <= RINGDOWN_THRESHOLD {
        length -= 1;
    }
    let ringdown = amplitude.len() - length;
    amplitude.truncate(length);
    phase.truncate(length);

    let mut pulse = PulseEvent {
        length,
        dead_time:rf.delay_us as f64 * 1e-6,
        ringdown_time:ringdown as f64 * raster,
        samples:Vec::new(),
    };

    let amplitude_runs = collapse_runs(&amplitude);
    let phase_runs = collapse_runs(&phase);
    let n_unique = amplitude_runs.len().max(phase_runs.len());

    if n_unique > max_samples {
        // too much structure, fall back to uniform decimation
        let factor = (length as f64 / max_samples as f64).ceil() as usize;
        let n_samples = length / factor;
        let timestep = factor as f64 * raster;
        for i in 0..n_samples {
            pulse.samples.push(PulseSample {
                magnitude:amplitude[i * factor],
                phase:phase[i * factor],
                timestep,
            });
        }
    } else {
        // variable timesteps from the run boundaries of whichever array has
        // more structure
        let boundaries = if amplitude_runs.len() >= phase_runs.len() {
            run_boundaries(&amplitude, &amplitude_runs)
        } else {
            run_boundaries(&phase, &phase_runs)
        };
        for pair in boundaries.windows(2) {
            pulse.samples.push(PulseSample {
                magnitude:amplitude[pair[0]],
                phase:phase[pair[0]],
                timestep:(pair[1] - pair[0]) as f64 * raster,
            });
        }
    }
    pulse
}

/// Collapse consecutive duplicates. Non-adjacent equal values stay separate.
fn collapse_runs(samples:&[f64]) -> Vec<f64> {
    let mut runs = Vec::with_capacity(samples.len());
    for &s in samples {
        if runs.last() != Some(&s) {
            runs.push(s);
        }
    }
    runs
}

/// First-occurrence index of each run, plus the total length as the final
/// boundary
fn run_boundaries(raw:&[f64], runs:&[f64]) -> Vec<usize> {
    let mut positions = Vec::with_capacity(runs.len() + 1);
    let mut start = 0;
    for run in runs {
        let idx = raw[start..]
            .iter()
            .position(|s| s == run)
            .expect("run value missing from raw array")
            + start;
        positions.push(idx);
        start = idx;
    }
    positions.push(raw.len());
    positions
}
