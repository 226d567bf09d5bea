// backend/src/auth/mod.rs

pub mod device_flow;
pub mod fake;
pub mod google;
pub mod middleware;
pub mod provider;

pub use device_flow::{DeviceFlowService, PollOutcome};
pub use middleware::{authenticate, require_auth, AuthenticatedUser};
pub use provider::{OAuthProvider, OAuthProviderDyn, ProviderIdentity, TokenExchange};
