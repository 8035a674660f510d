#![no_std]

pub mod cpu;
pub mod mem;
