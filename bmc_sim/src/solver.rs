/*
 Bloch-McConnell system assembly and time propagation.

 The coupled pool magnetizations obey dM/dt = A*M + C with a piecewise
 constant system matrix A. Each piece is advanced exactly via
 M' = exp(A*t)*(M + A^-1*C) - A^-1*C, with the matrix exponential computed by
 a scaling-and-squaring Pade approximation.

 A is laid out in three blocks for N CEST pools: x components of water and
 the CEST pools at rows 0..=N, y components at N+1..=2N+1, z components at
 2(N+1)..3(N+1)-1, and the MT z component (if active) at row 3(N+1).
 */

use std::f64::consts::PI;
use nalgebra::{DMatrix, DVector};
use crate::error::SimError;
use crate::params::SimParams;

const TWO_PI:f64 = 2.0 * PI;

pub struct BlochSolver {
    a:DMatrix<f64>,
    c:DVector<f64>,
    n_pools:usize,   // number of CEST pools
    mt_active:bool,
    pade_order:u32,
    w0:f64,  // larmor frequency [rad/s]
    dw0:f64, // field inhomogeneity [rad/s]
}

impl BlochSolver {
    pub fn new(sp:&SimParams) -> Result<BlochSolver, SimError> {
        sp.validate()?;
        let size = sp.required_vector_size();
        let mut solver = BlochSolver {
            a:DMatrix::zeros(size, size),
            c:DVector::zeros(size),
            n_pools:sp.num_cest_pools(),
            mt_active:sp.is_mt_active(),
            pade_order:6,
            w0:0.0,
            dw0:0.0,
        };
        solver.update_params(sp);
        Ok(solver)
    }

    pub fn dim(&self) -> usize {
        self.a.nrows()
    }

    /// Number of terms of the Pade approximant (default 6)
    pub fn set_pade_order(&mut self, order:u32) {
        self.pade_order = order;
    }

    /// Rebuild the exchange and relaxation structure of A and the relaxation
    /// vector C. Required once per pool parameter change; the RF-dependent
    /// entries are refreshed separately by [`Self::update_rf`].
    pub fn update_params(&mut self, sp:&SimParams) {
        let n = self.n_pools;
        self.a.fill(0.0);

        // MT pool exchanges with the water z component
        let mut k_ac = 0.0;
        if let Some(mt) = &sp.mt_pool {
            let k_ca = mt.k_hz;
            k_ac = k_ca * mt.f;
            self.a[(2 * (n + 1), 3 * (n + 1))] = k_ca;
            self.a[(3 * (n + 1), 2 * (n + 1))] = k_ac;
        }

        // water auto-relaxation picks up the forward exchange into every pool
        let mut k1a = sp.water_pool.r1 + k_ac;
        let mut k2a = sp.water_pool.r2;
        for pool in sp.cest_pools.iter() {
            let k_ai = pool.f * pool.k_hz;
            k1a += k_ai;
            k2a += k_ai;
        }
        self.a[(0, 0)] = -k2a;
        self.a[(1 + n, 1 + n)] = -k2a;
        self.a[(2 + 2 * n, 2 + 2 * n)] = -k1a;

        for (i, pool) in sp.cest_pools.iter().enumerate() {
            let k_ia = pool.k_hz;
            let k_ai = pool.f * pool.k_hz;
            let k1i = pool.r1 + k_ia;
            let k2i = pool.r2 + k_ia;

            // x block
            self.a[(0, i + 1)] = k_ia;
            self.a[(i + 1, 0)] = k_ai;
            self.a[(i + 1, i + 1)] = -k2i;

            // y block
            self.a[(1 + n, i + 2 + n)] = k_ia;
            self.a[(i + 2 + n, 1 + n)] = k_ai;
            self.a[(i + 2 + n, i + 2 + n)] = -k2i;

            // z block
            self.a[(2 * (n + 1), i + 1 + 2 * (n + 1))] = k_ia;
            self.a[(i + 1 + 2 * (n + 1), 2 * (n + 1))] = k_ai;
            self.a[(i + 1 + 2 * (n + 1), i + 1 + 2 * (n + 1))] = -k1i;
        }

        self.c.fill(0.0);
        self.c[2 * (n + 1)] = sp.water_pool.f * sp.water_pool.r1;
        for (i, pool) in sp.cest_pools.iter().enumerate() {
            self.c[2 * (n + 1) + i + 1] = pool.f * pool.r1;
        }
        if let Some(mt) = &sp.mt_pool {
            self.c[3 * (n + 1)] = mt.f * mt.r1;
        }

        self.w0 = sp.scanner.w0();
        self.dw0 = sp.scanner.dw0();
    }

    /// Refresh the RF drive and off-resonance entries of A for one pulse
    /// sample. All-zero arguments yield the pure relaxation matrix used for
    /// delays.
    ///
    /// `rf_amplitude` [Hz], `rf_frequency` offset from f0 [Hz],
    /// `rf_phase` [rad].
    pub fn update_rf(&mut self, sp:&SimParams, rf_amplitude:f64, rf_frequency:f64, rf_phase:f64) {
        let n = self.n_pools;

        // water x<->y dephasing
        self.a[(0, 1 + n)] = self.dw0;
        self.a[(1 + n, 0)] = -self.dw0;

        let amp_2pi = rf_amplitude * TWO_PI * sp.scanner.rel_b1;
        let amp_cos = amp_2pi * rf_phase.cos();
        let amp_sin = amp_2pi * rf_phase.sin();

        // water RF coupling
        self.a[(0, 2 * (n + 1))] = -amp_sin;
        self.a[(2 * (n + 1), 0)] = amp_sin;
        self.a[(n + 1, 2 * (n + 1))] = amp_cos;
        self.a[(2 * (n + 1), n + 1)] = -amp_cos;

        // CEST RF coupling
        for i in 1..=n {
            self.a[(i, i + 2 * (n + 1))] = -amp_sin;
            self.a[(i + 2 * (n + 1), i)] = amp_sin;
            self.a[(n + 1 + i, i + 2 * (n + 1))] = amp_cos;
            self.a[(i + 2 * (n + 1), n + 1 + i)] = -amp_cos;
        }

        // off-resonance terms
        let freq_2pi = rf_frequency * TWO_PI;
        self.a[(0, 1 + n)] += freq_2pi;
        self.a[(1 + n, 0)] -= freq_2pi;
        for (i, pool) in sp.cest_pools.iter().enumerate() {
            let dwi = pool.dw_ppm * self.w0 - (freq_2pi + self.dw0);
            self.a[(i + 1, i + n + 2)] = -dwi;
            self.a[(i + n + 2, i + 1)] = dwi;
        }

        // MT saturation follows the lineshape at the irradiation offset
        if let Some(mt) = &sp.mt_pool {
            self.a[(3 * (n + 1), 3 * (n + 1))] =
                -mt.r1 - mt.k_hz - amp_2pi.powi(2) * mt.lineshape_value(freq_2pi + self.dw0, self.w0);
        }
    }

    /// Advance M by t seconds under the current A and C.
    ///
    /// A must be invertible; a singular system matrix is a precondition
    /// violation and panics.
    pub fn propagate(&self, m:&mut DVector<f64>, t:f64) {
        let a_inv_c = self
            .a
            .clone()
            .lu()
            .solve(&self.c)
            .expect("bloch matrix is singular");

        let mut at = &self.a * t;

        // the Pade approximant is only stable for ||A*t||inf / 2^j <= 0.5
        let norm = inf_norm(&at);
        let inf_exp = if norm > 0.0 {
            norm.log2().floor() as i32 + 1
        } else {
            0
        };
        let j = (inf_exp + 1).max(0) as u32;
        at /= 2f64.powi(j as i32);

        // the recurrence starts with D = X = N = I and c = 1; after the first
        // term c is always 0.5, so start at k = 2 with the matrices in the
        // corresponding state
        let dim = at.nrows();
        let mut x = at.clone();
        let mut c = 0.5;
        let mut num = DMatrix::identity(dim, dim) + &at * c;
        let mut den = DMatrix::identity(dim, dim) - &at * c;
        let q = self.pade_order;
        let mut plus = true;
        for k in 2..=q {
            c *= (q - k + 1) as f64 / (k * (2 * q - k + 1)) as f64;
            x = &at * &x;
            let cx = &x * c;
            num += &cx;
            if plus {
                den += &cx;
            } else {
                den -= &cx;
            }
            plus = !plus;
        }

        // solve D*F = N for F, then undo the scaling by squaring
        let mut f = den.lu().solve(&num).expect("bloch matrix is singular");
        for _ in 0..j {
            f = &f * &f;
        }

        *m = &f * (&*m + &a_inv_c) - &a_inv_c;
    }
}

// Induced max-row-sum norm. This bounds the max coefficient magnitude from
// above, so the scaling exponent derived from it only ever errs toward extra
// squaring steps.
fn inf_norm(m:&DMatrix<f64>) -> f64 {
    let mut norm = 0f64;
    for row in m.row_iter() {
        let sum:f64 = row.iter().map(|v| v.abs()).sum();
        norm = norm.max(sum);
    }
    norm
}
