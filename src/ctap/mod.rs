pub mod command;
pub mod info;
pub mod params;
pub mod session;
pub mod state;
pub mod types;
