//! plotfetch cross-builds the plotnetcfg network diagnostic for the machine
//! type of each remote host, deploys it over SSH, runs it, and saves what it
//! printed locally.

pub mod builder;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod remote;
pub mod toolchain;
