pub mod models;
pub mod statements;
pub mod user_repository;

pub use models::{NewUser, User};
pub use user_repository::UserRepository;
