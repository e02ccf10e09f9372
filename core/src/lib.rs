pub mod audit;
pub mod config;
pub mod events;
pub mod logger;
pub mod ratelimit;
pub mod resilience;
pub mod safe;
pub mod store;

pub use audit::AuditLog;
pub use audit::EventType as AuditEventType;
pub use config::ConfigTree;
pub use config::load_config;
pub use events::EventLog;
pub use events::EventRecord;
pub use events::EventSeverity;
pub use logger::JsonLogger;
pub use logger::Level as LogLevel;
pub use ratelimit::RateLimitState;
pub use resilience::BreakerConfig;
pub use resilience::BreakerSnapshot;
pub use resilience::BreakerState;
pub use resilience::CircuitBreaker;
pub use resilience::RetryPolicy;
pub use store::StateDir;
