pub mod handler;
pub mod listener;
pub mod proxy;
pub mod resolver;
pub mod udp;

pub use handler::{handle_client, ClientHandlerContext};
pub use listener::*;
pub use proxy::*;
pub use resolver::*;
pub use udp::*;
