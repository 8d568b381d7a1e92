// swivel-rs: interactive host around the swivel_shared rotation core

pub mod host;

pub use swivel_shared::*;
