pub mod async_task;
pub mod convert;
pub mod file_io;
pub mod observability;
pub mod time;

#[cfg(test)]
mod utils_test;
