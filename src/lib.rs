#![no_std]

pub mod tracker;
pub mod utils;
