pub mod governor;
pub mod rate;

pub use governor::DomainGovernor;
pub use rate::RateLimiter;
