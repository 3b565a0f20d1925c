//! Control analysis: cooperative scheduling of actor scripts on top of a
//! wrapped data analysis.

pub mod explicit;
pub mod state;
pub mod transfer;
pub mod wrapped;

pub use state::{ControlAbstractState, RelationLocation, ThreadComputationState, ThreadState};
pub use transfer::ControlTransferRelation;
pub use wrapped::WrappedTransfer;
