/*
 Proton pools of the Bloch-McConnell system. Each pool carries its relaxation
 rates and population fraction; CEST pools add a chemical shift and an
 exchange rate, the (at most one) MT pool adds an absorption lineshape.
 */

use std::f64::consts::PI;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaterPool {
    pub r1:f64, // 1/T1 [Hz]
    pub r2:f64, // 1/T2 [Hz]
    pub f:f64,  // proton fraction
}

impl WaterPool {
    pub fn new(r1:f64, r2:f64, f:f64) -> WaterPool {
        WaterPool { r1, r2, f }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CestPool {
    pub r1:f64,
    pub r2:f64,
    pub f:f64,
    pub dw_ppm:f64, // offset from the water resonance [ppm]
    pub k_hz:f64,   // exchange rate towards water [Hz]
}

impl CestPool {
    pub fn new(r1:f64, r2:f64, f:f64, dw_ppm:f64, k_hz:f64) -> CestPool {
        CestPool { r1, r2, f, dw_ppm, k_hz }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lineshape {
    None,
    Lorentzian,
    SuperLorentzian,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MtPool {
    pub r1:f64,
    pub r2:f64,
    pub f:f64,
    pub dw_ppm:f64,
    pub k_hz:f64,
    pub lineshape:Lineshape,
}

impl MtPool {
    pub fn new(r1:f64, r2:f64, f:f64, dw_ppm:f64, k_hz:f64, lineshape:Lineshape) -> MtPool {
        MtPool { r1, r2, f, dw_ppm, k_hz, lineshape }
    }

    /// Saturation rate factor Rrfb/w1^2 of the semi-solid pool at the given
    /// irradiation offset [rad/s] and larmor frequency w0 [rad/s].
    /// Defined in doi:10.1088/0031-9155/58/22/R221.
    pub fn lineshape_value(&self, offset:f64, w0:f64) -> f64 {
        match self.lineshape {
            Lineshape::None => 0.0,
            Lineshape::Lorentzian => {
                let t2 = 1.0 / self.r2;
                t2 / (1.0 + ((offset - self.dw_ppm * w0) * t2).powi(2))
            }
            Lineshape::SuperLorentzian => {
                let dw_pool = offset - self.dw_ppm * w0;
                if dw_pool.abs() >= w0 {
                    // empirical cutoff is 1 ppm
                    self.super_lorentzian(dw_pool)
                } else {
                    // the integrand has a pole near zero offset, interpolate
                    // through it from 4 grid points outside the cutoff
                    let px = [-300.0 - w0, -100.0 - w0, 100.0 + w0, 300.0 + w0];
                    let py = px.map(|x| self.super_lorentzian(x));
                    cubic_hermite_spline(dw_pool, &px, &py)
                }
            }
        }
    }

    /// Riemann sum over the angle-cosine-squared kernel of the
    /// super-Lorentzian lineshape
    fn super_lorentzian(&self, dw:f64) -> f64 {
        let t2 = 1.0 / self.r2;
        let step = 0.01;
        let sqrt_2_pi = (2.0 / PI).sqrt();
        let mut line = 0.0;
        for i in 0..101 {
            let u2 = (3.0 * (step * i as f64).powi(2) - 1.0).abs();
            line += sqrt_2_pi * t2 / u2 * (-2.0 * (dw * t2 / u2).powi(2)).exp();
        }
        line * (PI * step)
    }
}

fn cubic_hermite_spline(x:f64, px:&[f64; 4], py:&[f64; 4]) -> f64 {
    let p0y = py[1];
    let p1y = py[2];

    let tangent_weight = 30.0; // empirically chosen
    let d0y = tangent_weight * (p0y - py[0]);
    let d1y = tangent_weight * (py[3] - p1y);

    let c_step = ((x - px[1] + 1.0) / (px[2] - px[1] + 1.0)).abs();
    let c3 = c_step * c_step * c_step;
    let c2 = c_step * c_step;

    let h0 = 2.0 * c3 - 3.0 * c2 + 1.0;
    let h1 = -2.0 * c3 + 3.0 * c2;
    let h2 = c3 - 2.0 * c2 + c_step;
    let h3 = c3 - c2;
    h0 * p0y + h1 * p1y + h2 * d0y + h3 * d1y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const W0_3T:f64 = 3.0 * 42.577 * 2.0 * PI; // [rad/s] per uT scaling as used by the solver

    #[test]
    fn no_lineshape_is_zero() {
        let mt = MtPool::new(1.0, 1e5, 0.05, -2.4, 40.0, Lineshape::None);
        assert_eq!(mt.lineshape_value(1000.0, W0_3T), 0.0);
    }

    #[test]
    fn lorentzian_matches_closed_form() {
        let mt = MtPool::new(1.0, 1e5, 0.05, -2.4, 40.0, Lineshape::Lorentzian);
        let offset = 2000.0;
        let t2 = 1.0 / mt.r2;
        let expected = t2 / (1.0 + ((offset - mt.dw_ppm * W0_3T) * t2).powi(2));
        assert_relative_eq!(mt.lineshape_value(offset, W0_3T), expected, max_relative = 1e-12);
    }

    #[test]
    fn lorentzian_peaks_at_pool_resonance() {
        let mt = MtPool::new(1.0, 1e5, 0.05, -2.4, 40.0, Lineshape::Lorentzian);
        let on = mt.lineshape_value(mt.dw_ppm * W0_3T, W0_3T);
        let off = mt.lineshape_value(mt.dw_ppm * W0_3T + 5000.0, W0_3T);
        assert!(on > off);
        assert_relative_eq!(on, 1.0 / mt.r2, max_relative = 1e-12);
    }

    #[test]
    fn super_lorentzian_is_finite_inside_the_cutoff() {
        // inside 1 ppm the direct sum has a pole, the spline fallback must
        // still give a finite positive value
        let mt = MtPool::new(1.0, 1e5, 0.05, 0.0, 40.0, Lineshape::SuperLorentzian);
        let v = mt.lineshape_value(0.1 * W0_3T, W0_3T);
        assert!(v.is_finite());
        assert!(v > 0.0);
    }

    #[test]
    fn super_lorentzian_direct_evaluation_decays_off_resonance() {
        let mt = MtPool::new(1.0, 1e5, 0.05, 0.0, 40.0, Lineshape::SuperLorentzian);
        let near = mt.lineshape_value(1.5 * W0_3T, W0_3T);
        let far = mt.lineshape_value(50.0 * W0_3T, W0_3T);
        assert!(near > far);
        assert!(far > 0.0);
    }
}
