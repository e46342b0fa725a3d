mod coordinator;
mod credential_store;
mod error;
mod exchange;
mod teardown;
mod tokens;

pub use coordinator::{FailedRequest, RefreshCoordinator, TOKEN_EXPIRED_CODE};
pub use credential_store::{
    CredentialStore, FileCredentialStore, MemoryCredentialStore, PersistOptions,
    ACCESS_TOKEN_ENTRY, REFRESH_TOKEN_ENTRY,
};
pub use error::AuthError;
pub use exchange::{ExchangedTokens, RefreshExchange};
pub use teardown::{ContextMode, SessionTeardown};
pub use tokens::TokenPair;

pub(crate) use tokens::bearer_header;
