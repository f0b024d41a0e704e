pub mod backend;
pub mod btle;
pub mod constants;
pub mod decode;
pub mod hub;
pub mod observers;
pub mod session;
pub mod types;
pub mod wire;
