pub mod attempts;
pub mod core;
pub mod directory;
pub mod questions;
pub mod quizzes;
