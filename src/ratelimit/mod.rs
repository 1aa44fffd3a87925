//! Fixed-window rate limiting.

mod backend;
mod key;
mod limiter;
mod window;

pub use backend::RateLimiterBackend;
pub use key::{KeyNamespace, RateLimitKey, DEFAULT_NAMESPACE};
pub use limiter::FixedWindowLimiter;
pub use window::{Decision, Limit, Verdict, Window, WindowState, MAX_WINDOW_SECS};
