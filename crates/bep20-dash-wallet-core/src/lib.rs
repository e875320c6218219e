pub mod config;
pub mod detector;
pub mod domain;
pub mod errors;
pub mod handle;
pub mod manager;
pub mod networks;
pub mod ports;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod state_machine;

pub use config::SessionConfig;
pub use detector::{ProviderDescriptor, ProviderDetector};
pub use domain::{
    ConnectionState, ConnectionStatus, ConnectionStrategy, NetworkDescriptor, NetworkInfo,
    NetworkState, TimestampMs, TokenDescriptor,
};
pub use errors::{
    ActionKind, ErrorClassifier, ErrorContext, ErrorType, RawError, RecoveryAction, Severity,
    StructuredError,
};
pub use handle::{WalletHandle, WalletSigner};
pub use manager::{ConnectFailure, ConnectOptions, ConnectedSession, ConnectionManager};
pub use ports::{
    ClockPort, InjectedProvider, PortError, ProviderEnvironment, ProviderEvent,
    ProviderEventKind, ProviderRpcError, Subscription, WalletFlags,
};
pub use reconciler::{NetworkReconciler, SwitchFailure};
pub use session::{SessionContext, SessionController, SessionNotice, SessionSnapshot};
pub use state_machine::{connection_transition, ConnectionAction, StateTransition};
