pub mod auth;
pub mod definition;
pub mod extract;
pub mod loader;
pub mod rest;
pub mod source;
pub mod tracker;

pub use auth::{AUTH_TOKEN_HEADER, AuthConfigError, Credentials, IdentityAuthenticator};
pub use definition::{ContentTypeDefinition, default_definitions};
pub use extract::{ExtractError, FieldExtractor, FieldPath};
pub use loader::{DefinitionFailure, LoadError, LoadReport, LoadStatistics, Loader, build_index};
pub use rest::{
    Exchange, FailedResponse, Interceptor, MimeType, Next, ResponseContent, ResponseSlot,
    RestClient, RestEntity, RestError,
};
pub use source::{DirSourceContent, SourceContent, SourceError};
pub use tracker::{Fingerprint, UniquenessTracker};

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
