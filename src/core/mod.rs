pub mod error;
pub mod types;
pub mod value;

pub use error::{CloseFailure, Result, Role, ShardError, StorageError};
pub use types::{Row, Rows};
pub use value::Value;
