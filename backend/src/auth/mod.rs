//! Bearer-token authentication and per-user rate limiting.

mod jwks;
mod rate_limit;

pub use jwks::{bearer_token, AuthError, AuthUser, JwksClient};
pub use rate_limit::{RateLimited, UserRateLimiter};
