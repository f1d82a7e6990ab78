pub mod models;
pub mod pull;
pub mod reset;
pub mod restart;
pub mod setup;
pub mod start;
pub mod status;
pub mod stop;
