//! Client-side identity and session handling: the credential, the signed-in identity,
//! the session store with its durable side-channel, and the identity backend client.
//! Keep the public surface thin and split implementation across sub-modules.

mod credential;
mod persistence;
mod principal;
mod provider;
mod session;

pub use credential::Credential;
pub use persistence::{FileSessionPersistence, MemorySessionPersistence, PersistedSession, SessionPersistence};
pub use principal::Identity;
pub use provider::{IdentityClient, LoginError, LoginRequest, LoginResponse};
pub use session::SessionStore;
