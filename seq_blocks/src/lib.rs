pub mod event;
pub mod block;
pub mod sequence;

pub use block::SeqBlock;
pub use event::{AdcEvent, GradEvent, GradKind, RfEvent};
pub use sequence::{DecodedRf, SeqError, Sequence, Shape};
