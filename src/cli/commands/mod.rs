pub mod circuit;
pub mod config;
pub mod health;
pub mod send;
pub mod status;
