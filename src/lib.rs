pub mod api;
pub mod blob;
pub mod cache;
pub mod config;
pub mod counter;
pub mod database;
pub mod error;
pub mod logger;
pub mod model;
pub mod server;
pub mod service;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;

pub trait Located {
    fn location(&self) -> snafu::Location;
}
