pub mod bus;
pub mod cart;
pub mod dd;
pub mod pi;
pub mod queue;
pub mod sc64;
pub mod system;

pub use system::System;
