// Order execution: backends, the order ledger and the control loop
pub mod backend;
pub mod control_loop;
pub mod ledger;

pub use backend::{Backend, LiveBackend, SimulatedBackend};
pub use control_loop::{ControlLoop, LoopConfig, LoopReport, LoopState};
pub use ledger::{ClosedTrade, OrderLedger, PendingOrder, Position, UpdateSummary};
