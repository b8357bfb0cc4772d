pub mod classify;
pub mod sources;
pub mod streams;
