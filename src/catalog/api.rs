use futures::future::BoxFuture;
use thiserror::Error;

use crate::error::{FetchError, MutationError};

use super::credentials::CredentialError;
use super::model::{Book, BookDraft, Language, Publisher, Session, SignUp};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized - sign in again")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Credential store error: {0}")]
    Credentials(#[from] CredentialError),
}

impl From<ApiError> for FetchError {
    fn from(error: ApiError) -> Self {
        FetchError::from_source(error)
    }
}

impl From<ApiError> for MutationError {
    fn from(error: ApiError) -> Self {
        MutationError::from_source(error)
    }
}

pub type ApiFuture<T> = BoxFuture<'static, Result<T, ApiError>>;

/// The REST backend of the catalog.
///
/// Implementations own the transport: request framing, bearer-token
/// injection from the credential store, and status-code mapping into
/// [`ApiError`].
pub trait CatalogApi: Send + Sync {
    fn list_books(&self) -> ApiFuture<Vec<Book>>;

    fn get_book(&self, id: i64) -> ApiFuture<Book>;

    fn create_book(&self, draft: BookDraft) -> ApiFuture<Book>;

    fn update_book(&self, id: i64, draft: BookDraft) -> ApiFuture<Book>;

    fn delete_book(&self, id: i64) -> ApiFuture<()>;

    fn list_publishers(&self) -> ApiFuture<Vec<Publisher>>;

    fn list_languages(&self) -> ApiFuture<Vec<Language>>;

    /// Exchanges credentials for an access token and the signed-in user.
    fn login(&self, email: String, password: String) -> ApiFuture<Session>;

    /// Registers a new account and signs it in.
    fn sign_up(&self, sign_up: SignUp) -> ApiFuture<Session>;
}
