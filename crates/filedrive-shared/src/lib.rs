// Types and primitives shared by the filedrive store and server.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod identity;
pub mod types;

pub use credentials::{Claims, CredentialIssuer, CredentialKind, CredentialPair};
pub use error::{CredentialError, ProfileError, RejectReason};
pub use identity::VerifiedIdentity;
pub use types::{AuthenticatedUser, PermissionLevel, ResourceRef};
