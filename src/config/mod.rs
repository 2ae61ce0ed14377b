//! Configuration for gadget compilation and the command line tool

mod schema;
mod store;

pub use schema::{AppConfig, GadgetEnv};
pub use store::ConfigStore;
