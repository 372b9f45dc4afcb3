pub mod terminal;
pub mod transport;
pub mod upstreams;
pub mod verifiers;
pub mod widgets;
