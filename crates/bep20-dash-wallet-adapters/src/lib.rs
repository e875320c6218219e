pub mod clock;
pub mod config;
pub mod eip1193;
pub mod environment;
pub mod runtime;
pub mod telemetry;

pub use clock::SystemClockAdapter;
pub use config::{RuntimeProfile, WalletRuntimeConfig};
pub use eip1193::{Eip1193Adapter, ProviderShape, RecordedCall, RecordedEvent, RequestGate};
pub use environment::InjectedEnvironment;
pub use runtime::WalletRuntime;
pub use telemetry::init_tracing;
