//! 客户端管线的弹性阶段：熔断、限流、轮询与有界重试。
//!
//! 组合顺序（由内到外）：线上调用 → 熔断器（每端点每方法）→ 限流器（每接口共享）
//! → 轮询选择器 → 重试策略。熔断器更靠近网络，限流拒绝不会被误记为后端故障。

pub mod balancer;
pub mod breaker;
pub mod limiter;
pub mod retry;

pub use balancer::RoundRobin;
pub use breaker::{BreakerLayer, BreakerSettings, BreakerState, CircuitBreaker, Permit};
pub use limiter::{LimiterLayer, RateLimiter};
pub use retry::RetryPolicy;
