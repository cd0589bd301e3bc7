pub mod load;
pub mod webhook;
