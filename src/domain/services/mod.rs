pub mod actions;
mod authorizer;
mod client_state;
mod demux;
mod exchange_log;
mod orchestrator;
mod persistence;
mod quota;
mod users;
mod verification_gate;

pub use authorizer::*;
pub use client_state::*;
pub use demux::*;
pub use exchange_log::*;
pub use orchestrator::*;
pub use persistence::*;
pub use quota::*;
pub use users::*;
pub use verification_gate::*;
