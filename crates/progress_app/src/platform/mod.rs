mod app;
mod config;
mod persistence;
mod session;

pub use app::run_app;
