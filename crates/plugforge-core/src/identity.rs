//! Identity ports.
//!
//! [`PrincipalResolver`] binds a connection's credential to a principal once
//! per connection. [`PrincipalRepository`] manages principals and their API
//! keys for the CLI.

use plugforge_types::error::RepositoryError;
use plugforge_types::identity::{Principal, PrincipalId};

/// Resolve a presented credential (API key) to a principal.
pub trait PrincipalResolver: Send + Sync {
    /// `Ok(None)` when the credential is unknown.
    fn resolve_principal(
        &self,
        credential: &str,
    ) -> impl std::future::Future<Output = Result<Option<PrincipalId>, RepositoryError>> + Send;
}

/// A newly created principal together with its plaintext API key.
///
/// The key is only ever available here; storage keeps a hash.
#[derive(Debug)]
pub struct IssuedPrincipal {
    pub principal: Principal,
    pub api_key: String,
}

/// Principal management.
pub trait PrincipalRepository: Send + Sync {
    /// Create a principal and issue its API key.
    fn create_principal(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<IssuedPrincipal, RepositoryError>> + Send;

    /// All principals, oldest first.
    fn list_principals(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Principal>, RepositoryError>> + Send;
}
