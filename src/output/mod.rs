// Output module for Flotilla

pub mod errors;
pub mod json;
pub mod terminal;

pub use errors::*;
pub use json::*;
pub use terminal::*;
