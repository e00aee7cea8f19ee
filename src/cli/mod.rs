pub mod console;
pub mod credential;
