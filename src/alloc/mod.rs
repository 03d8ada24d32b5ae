pub mod hook;
pub mod map;
pub mod real;
