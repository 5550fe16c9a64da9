pub mod error;
pub mod jwt;
pub mod strings;

pub use error::{ApiError, ApiResult};
pub use jwt::JwtUtil;
pub use strings::{clean_optional_string, normalize_user, truncate_at_word_boundary};
