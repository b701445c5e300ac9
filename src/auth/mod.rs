pub mod credential;
pub mod token;

pub use credential::{Clock, Credential, CredentialCache, SystemClock};
pub use token::{ApiKeyTokenSource, TokenGrant, TokenSource, TOKEN_URL_BASE};
