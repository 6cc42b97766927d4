//! Host processor information

pub mod cpu;

pub use cpu::model_name;
