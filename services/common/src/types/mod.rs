//! Core types for the OMS trading kernel

pub mod account;
pub mod order;
pub mod position;

pub use account::*;
pub use order::*;
pub use position::*;
