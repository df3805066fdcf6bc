pub mod address;
pub mod backoff;
pub mod id;
pub mod logging;

pub use tracing;

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
