//! Deterministic, pure logic shared by the automation layers.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take the current instant as an argument, so their
//! outputs are reproducible in tests.

pub mod budget;
pub mod pricing;
pub mod sell_list;
pub mod types;
