pub mod args;
pub mod creds;
pub mod wait;

pub use creds::{Credential, CredentialStore, StaticCredentialStore};

/// Install the process-wide tracing subscriber. Hosts embedding the engine
/// call this once from their entry point; tests leave it uninstalled.
pub fn init() {
    tracing_subscriber::fmt::init();
}
