pub mod analysis;
pub mod history;
pub mod styles;
