/*
 Simulation driver. Walks the sequence blocks in file order and dispatches
 them to matrix updates and propagation calls:

   - ADC block: snapshot the running magnetization into the output column
   - three-axis trapezoid block: relax over the block, then spoil the
     transverse magnetization
   - RF block: look up the decoded pulse and propagate sample by sample,
     applying the per-block amplitude/frequency/phase on each sample
   - anything else: pure relaxation over the block duration

 One run is a single synchronous call; concurrent runs need independent
 BmcSim instances.
 */

use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;
use log::{debug, info};
use nalgebra::DMatrix;
use seq_blocks::Sequence;
use crate::error::SimError;
use crate::params::SimParams;
use crate::pulse::{decode_unique_pulses, pulse_id, PulseEvent, PulseId};
use crate::solver::BlochSolver;

pub struct BmcSim {
    sp:SimParams,
    solver:BlochSolver,
    seq:Option<Sequence>,
    unique_pulses:HashMap<PulseId, PulseEvent>,
    m_out:DMatrix<f64>,
}

impl BmcSim {
    pub fn new(params:SimParams) -> Result<BmcSim, SimError> {
        let solver = BlochSolver::new(&params)?;
        Ok(BmcSim {
            sp:params,
            solver,
            seq:None,
            unique_pulses:HashMap::new(),
            m_out:DMatrix::zeros(0, 0),
        })
    }

    /// Load a sequence from disk. Fails on unreadable/malformed files and on
    /// sequences without ADC events, before any matrix work.
    pub fn load_sequence(&mut self, path:&Path) -> Result<(), SimError> {
        let seq = Sequence::load(path)?;
        self.set_sequence(seq)
    }

    /// Attach an already-decoded sequence
    pub fn set_sequence(&mut self, seq:Sequence) -> Result<(), SimError> {
        let n_adc = seq.blocks.iter().filter(|b| b.is_adc()).count();
        if n_adc == 0 {
            return Err(SimError::NoAdcEvents);
        }
        self.sp.validate()?;
        self.unique_pulses = decode_unique_pulses(&seq, self.sp.max_pulse_samples)?;
        self.m_out = DMatrix::zeros(self.sp.required_vector_size(), n_adc);
        if self.sp.verbose {
            info!(
                "sequence with {} blocks, {} adc events, {} unique pulses",
                seq.n_blocks(),
                n_adc,
                self.unique_pulses.len()
            );
        }
        self.seq = Some(seq);
        Ok(())
    }

    /// Swap in new pool/scanner values between runs. Accepted only while the
    /// pool topology (CEST pool count and MT flag) is unchanged; a rejected
    /// update keeps the previous parameters.
    pub fn update_params(&mut self, params:SimParams) -> bool {
        let accepted = params.num_cest_pools() == self.sp.num_cest_pools()
            && params.is_mt_active() == self.sp.is_mt_active()
            && params.validate().is_ok();
        if accepted {
            self.sp = params;
        }
        accepted
    }

    pub fn params(&self) -> &SimParams {
        &self.sp
    }

    pub fn set_pade_order(&mut self, order:u32) {
        self.solver.set_pade_order(order);
    }

    /// Magnetization at each ADC event (rows = state size, one column per
    /// ADC). Valid after a completed run.
    pub fn magnetization(&self) -> &DMatrix<f64> {
        &self.m_out
    }

    pub fn magnetization_copy(&self) -> DMatrix<f64> {
        self.m_out.clone()
    }

    /// Run the full simulation once
    pub fn run(&mut self) -> Result<(), SimError> {
        let seq = self.seq.as_ref().ok_or(SimError::SequenceNotLoaded)?;
        self.sp.validate()?;
        self.solver.update_params(&self.sp);

        // every column starts out as the initial vector so a reset after ADC
        // can read its own (not yet overwritten) column
        let m_init = self.sp.initial_magnetization();
        for mut col in self.m_out.column_iter_mut() {
            col.copy_from(m_init);
        }

        let raster = seq.rf_raster_s();
        let n_transverse = (self.sp.num_cest_pools() + 1) * 2;
        let mut adc_idx = 0;
        // simulation runs in the reference frame, so the phase accumulated by
        // off-resonant pulses has to be carried forward
        let mut accum_phase = 0f64;
        let mut m = self.m_out.column(0).into_owned();

        for block in seq.blocks.iter() {
            if block.is_adc() {
                self.m_out.set_column(adc_idx, &m);
                adc_idx += 1;
                if adc_idx >= self.m_out.ncols() {
                    // trailing blocks past the last requested sample
                    break;
                }
                if self.sp.reset_init_magnetization {
                    m = self.m_out.column(adc_idx).into_owned();
                }
            } else if block.is_trap_gradient(0) && block.is_trap_gradient(1) && block.is_trap_gradient(2)
            {
                // crusher: relax over the block, then spoil
                self.solver.update_rf(&self.sp, 0.0, 0.0, 0.0);
                self.solver.propagate(&mut m, block.duration_s());
                for i in 0..n_transverse {
                    m[i] = 0.0;
                }
            } else if let Some(rf) = &block.rf {
                let id = pulse_id(seq, rf);
                let pulse = self
                    .unique_pulses
                    .get(&id)
                    .expect("pulse library out of sync with sequence");
                if pulse.dead_time > 0.0 {
                    self.solver.update_rf(&self.sp, 0.0, 0.0, 0.0);
                    self.solver.propagate(&mut m, pulse.dead_time);
                }
                for sample in pulse.samples.iter() {
                    self.solver.update_rf(
                        &self.sp,
                        sample.magnitude * rf.amplitude,
                        rf.freq_offset,
                        -sample.phase + rf.phase_offset - accum_phase,
                    );
                    self.solver.propagate(&mut m, sample.timestep);
                }
                if pulse.ringdown_time > 0.0 {
                    self.solver.update_rf(&self.sp, 0.0, 0.0, 0.0);
                    self.solver.propagate(&mut m, pulse.ringdown_time);
                }
                accum_phase += wrapped_phase_increment(pulse.length, raster, rf.freq_offset);
            } else {
                // pure delay, or a gradient on fewer than 3 axes
                self.solver.update_rf(&self.sp, 0.0, 0.0, 0.0);
                self.solver.propagate(&mut m, block.duration_s());
            }
        }
        debug!("run complete, {} adc samples", adc_idx);
        Ok(())
    }
}

/// Reference-frame phase picked up by one off-resonant pulse [rad]. The
/// degree total is truncated to an integer and wrapped to one RF cycle before
/// the conversion, dropping whole multiples of 360 degrees.
fn wrapped_phase_increment(pulse_length:usize, raster:f64, freq_offset:f64) -> f64 {
    let mut phase_degree = (pulse_length as f64 * raster * 360.0 * freq_offset) as i64;
    phase_degree %= 360;
    phase_degree as f64 / 180.0 * PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn whole_cycles_drop_out_of_the_accumulated_phase() {
        // 1000 us at 1000 Hz is exactly 1000 cycles: no residual phase
        assert_eq!(wrapped_phase_increment(1000, 1e-6, 1000.0), 0.0);
    }

    #[test]
    fn partial_cycles_wrap_to_integer_degrees() {
        // 500 us at 1500 Hz: 270000 degrees, 270000 % 360 = 0
        assert_eq!(wrapped_phase_increment(500, 1e-6, 1500.0), 0.0);
        // 100 us at 1234 Hz: 44.424 degrees truncates to 44
        assert_abs_diff_eq!(
            wrapped_phase_increment(100, 1e-6, 1234.0),
            44.0 / 180.0 * PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn negative_offsets_truncate_towards_zero() {
        // -44.424 degrees truncates to -44, matching integer arithmetic
        assert_abs_diff_eq!(
            wrapped_phase_increment(100, 1e-6, -1234.0),
            -44.0 / 180.0 * PI,
            epsilon = 1e-12
        );
    }
}
