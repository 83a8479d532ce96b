use std::f64::consts::PI;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use crate::error::SimError;
use crate::pools::{CestPool, MtPool, WaterPool};

/// Gyromagnetic ratio of the proton [rad/uT]
pub const GAMMA_1H:f64 = 42.577 * 2.0 * PI;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Scanner {
    pub b0:f64,       // static field [T]
    pub rel_b1:f64,   // relative B1 scale (B1 inhomogeneity)
    pub b0_inhom:f64, // field inhomogeneity [ppm]
    pub gamma:f64,    // gyromagnetic ratio [rad/uT]
}

impl Scanner {
    pub fn new(b0:f64) -> Scanner {
        Scanner {
            b0,
            rel_b1:1.0,
            b0_inhom:0.0,
            gamma:GAMMA_1H,
        }
    }

    /// Larmor frequency [rad/s]
    pub fn w0(&self) -> f64 {
        self.b0 * self.gamma
    }

    /// Off-resonance due to field inhomogeneity [rad/s]
    pub fn dw0(&self) -> f64 {
        self.w0() * self.b0_inhom
    }
}

/// All tissue and scanner parameters of one simulation. Owned by the caller
/// and handed to [`crate::BmcSim`]; pool values can be updated between runs,
/// the pool topology cannot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimParams {
    pub water_pool:WaterPool,
    pub cest_pools:Vec<CestPool>,
    pub mt_pool:Option<MtPool>,
    pub scanner:Scanner,
    m_init:DVector<f64>,
    pub max_pulse_samples:usize,
    /// Reset the magnetization to the initial vector after each ADC. Set to
    /// false when the readout itself is simulated, e.g. for transient-state
    /// sequences.
    pub reset_init_magnetization:bool,
    pub verbose:bool,
}

impl SimParams {
    pub fn new(water_pool:WaterPool, scanner:Scanner) -> SimParams {
        let mut sp = SimParams {
            water_pool,
            cest_pools:Vec::new(),
            mt_pool:None,
            scanner,
            m_init:DVector::zeros(0),
            max_pulse_samples:100,
            reset_init_magnetization:true,
            verbose:false,
        };
        sp.m_init = sp.equilibrium_magnetization();
        sp
    }

    pub fn num_cest_pools(&self) -> usize {
        self.cest_pools.len()
    }

    pub fn is_mt_active(&self) -> bool {
        self.mt_pool.is_some()
    }

    /// State vector size: x and y components of water and every CEST pool,
    /// z components of water, every CEST pool and the MT pool if present
    pub fn required_vector_size(&self) -> usize {
        3 * (1 + self.num_cest_pools()) + usize::from(self.is_mt_active())
    }

    /// Thermal equilibrium state: transverse components zero, z components at
    /// the pool fractions
    pub fn equilibrium_magnetization(&self) -> DVector<f64> {
        let n = self.num_cest_pools();
        let mut m = DVector::zeros(self.required_vector_size());
        m[2 * (n + 1)] = self.water_pool.f;
        for (i, pool) in self.cest_pools.iter().enumerate() {
            m[2 * (n + 1) + i + 1] = pool.f;
        }
        if let Some(mt) = &self.mt_pool {
            m[3 * (n + 1)] = mt.f;
        }
        m
    }

    pub fn set_initial_magnetization(&mut self, m:DVector<f64>) {
        self.m_init = m;
    }

    /// Re-derive the initial vector after the pool layout changed
    pub fn reset_initial_magnetization(&mut self) {
        self.m_init = self.equilibrium_magnetization();
    }

    pub fn initial_magnetization(&self) -> &DVector<f64> {
        &self.m_init
    }

    /// Reject a magnetization vector that does not match the pool topology.
    /// Runs before any matrix is allocated.
    pub fn validate(&self) -> Result<(), SimError> {
        let required = self.required_vector_size();
        if self.m_init.len() != required {
            return Err(SimError::MagnetizationSize {
                required,
                found:self.m_init.len(),
            });
        }
        Ok(())
    }
}
