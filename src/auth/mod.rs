// Authentication module
// Manages the token pair, its persistence and coalesced refresh

mod manager;
mod refresh;
pub mod store;
pub mod types;

pub use manager::AuthManager;
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use types::{CredentialPair, LoginSecret, UserProfile};
