//! Admission control: sliding-window rate limiting and the store circuit breaker.

pub mod circuit_breaker;
pub mod rate_limit;

pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use rate_limit::{
    FailurePolicy, NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimitKey,
    RateLimitRule, RateLimiter, SlidingWindowRateLimiter,
};
