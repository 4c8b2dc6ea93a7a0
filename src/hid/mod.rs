//! CTAPHID framed transport.
pub mod backend;
pub mod command;
pub mod transport;

pub use backend::HidBackend;
pub use transport::{Frame, HidConnection};
