//! Built-in services served by in-process workers.

pub mod echo;

pub use echo::EchoService;
