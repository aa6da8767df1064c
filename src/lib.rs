#![allow(non_snake_case)]

use types::Float;
pub extern crate nalgebra as na;

pub mod constraint;
pub mod constraints;
pub mod error;
pub mod gradient;
pub mod model;
pub mod qp;
pub mod solver;
pub mod task;
pub mod tasks;
pub mod types;
pub mod util;

pub mod helpers;

pub const GRAVITY: Float = 9.81;

pub const PI: Float = std::f64::consts::PI;
