mod action;
mod catalog;
mod endpoint_error;
mod errors;
mod event;
mod generation;
mod provider;
mod segment;
mod slash_commands;
mod transport;
mod usage;
mod verification;

pub use action::*;
pub use catalog::*;
pub use endpoint_error::*;
pub use errors::*;
pub use event::*;
pub use generation::*;
pub use provider::*;
pub use segment::*;
pub use slash_commands::*;
pub use transport::*;
pub use usage::*;
pub use verification::*;
