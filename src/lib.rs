pub mod config;
pub mod dispatch;
pub mod error;
pub mod intake;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod stream;
pub mod transport;

mod util;
