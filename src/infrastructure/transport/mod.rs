mod exchanges;
mod http;

pub use exchanges::*;
pub use http::*;
