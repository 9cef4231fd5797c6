//! Distributed power spectrum estimation and initial-condition halo centres
//! for periodic N-body boxes.
#![cfg_attr(feature = "strict", deny(warnings), deny(unused_crate_dependencies))]
#![warn(missing_docs)]

pub mod binning;
pub mod combine;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod fields;
pub mod halos;
pub mod mesh;
pub mod multipoles;
pub mod parsort;
pub mod power;
pub mod storage;
pub mod tools;
pub mod transform;

pub use error::{PowerError, Result};
