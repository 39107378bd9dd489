pub mod channel;
pub mod config;
pub mod guest;
pub mod host;
pub mod idmap;
pub mod launch;
pub mod machines;
pub mod network;

#[cfg(test)]
mod testing;
