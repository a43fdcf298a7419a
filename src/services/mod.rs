pub mod callback;
pub mod consumer;
pub mod dead_letters;
pub mod derivatives;
pub mod metadata;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod thumbnail;
pub mod uploads;
