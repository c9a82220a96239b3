pub mod normalize;
pub mod robots;
pub mod ssrf;

pub use normalize::{is_tracking_param, normalize, registrable_domain, sha256_hex, strip_tracking_params, NormalizedUrl};
pub use robots::RobotsCache;
pub use ssrf::{blocked_ip_reason, ensure_public_address};
