use serde::{Deserialize, Serialize};
use crate::event::{AdcEvent, GradEvent, GradKind, RfEvent};

/// One block of the sequence. A block always has a nominal duration; which
/// events it carries determines how the simulation treats it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeqBlock {
    pub duration_us:u64,
    pub rf:Option<RfEvent>,
    pub gradients:[Option<GradEvent>; 3],
    pub adc:Option<AdcEvent>,
}

impl SeqBlock {
    /// Pure delay block
    pub fn delay(duration_us:u64) -> SeqBlock {
        SeqBlock {
            duration_us,
            ..Default::default()
        }
    }

    pub fn rf(duration_us:u64, rf:RfEvent) -> SeqBlock {
        SeqBlock {
            duration_us,
            rf:Some(rf),
            ..Default::default()
        }
    }

    pub fn adc(duration_us:u64, adc:AdcEvent) -> SeqBlock {
        SeqBlock {
            duration_us,
            adc:Some(adc),
            ..Default::default()
        }
    }

    /// Spoiler block with the same trapezoid on all three axes
    pub fn crusher(duration_us:u64, grad:GradEvent) -> SeqBlock {
        SeqBlock {
            duration_us,
            gradients:[Some(grad.clone()), Some(grad.clone()), Some(grad)],
            ..Default::default()
        }
    }

    pub fn is_adc(&self) -> bool {
        self.adc.is_some()
    }

    pub fn is_rf(&self) -> bool {
        self.rf.is_some()
    }

    pub fn is_trap_gradient(&self, axis:usize) -> bool {
        matches!(&self.gradients[axis], Some(g) if g.kind == GradKind::Trapezoid)
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_us as f64 * 1e-6
    }
}
