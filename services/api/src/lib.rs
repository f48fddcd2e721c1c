pub mod adapters;
pub mod background;
pub mod config;
pub mod error;
pub mod web;
