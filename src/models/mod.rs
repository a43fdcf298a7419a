pub mod dead_letter;
pub mod derivative;
pub mod event;
pub mod upload;
