//! SQL issued by [`UserRepository`](super::UserRepository).
//!
//! Arguments are positional (`$1`, `$2`, ...). The in-memory backend serves
//! exactly these statements, so they are shared constants rather than
//! inline literals.

pub const CREATE_USERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL,
    email VARCHAR(255) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

/// `$1` user_id, `$2` name, `$3` email. Returns `id, created_at`.
pub const INSERT_USER: &str =
    "INSERT INTO users (user_id, name, email) VALUES ($1, $2, $3) RETURNING id, created_at";

/// `$1` user_id.
pub const SELECT_USER: &str =
    "SELECT id, user_id, name, email, created_at FROM users WHERE user_id = $1";

/// `$1` user_id, `$2` name, `$3` email.
pub const UPDATE_USER: &str = "UPDATE users SET name = $2, email = $3 WHERE user_id = $1";

/// `$1` user_id.
pub const DELETE_USER: &str = "DELETE FROM users WHERE user_id = $1";

pub const SELECT_ALL_USERS: &str =
    "SELECT id, user_id, name, email, created_at FROM users ORDER BY created_at DESC";

pub const COUNT_USERS: &str = "SELECT COUNT(*) FROM users";
