pub mod auth;
pub mod rate_limit;

pub use auth::{issue_token, AuthActor, Claims, MaybeActor};
pub use rate_limit::rate_limit_middleware;
