//! A book catalog client built on the query cache.
//!
//! The catalog serves books, publishers, languages, and the signed-in user
//! through [`Catalog`], which subscribes to the cache for reads and routes
//! writes through the mutation coordinator so that every list stays current:
//!
//! - book writes invalidate the `books` prefix (the plain list and every
//!   filtered list) plus the touched book's detail key
//! - login, sign-up, logout, and profile changes invalidate `activeUser`
//!
//! The backend is abstracted behind [`CatalogApi`]; [`MemoryCatalog`] is an
//! in-process implementation. Session credentials live in a
//! [`CredentialStore`].

pub mod api;
pub mod credentials;
pub mod keys;
pub mod memory;
pub mod model;
pub mod search;
pub mod service;

pub use api::{ApiError, ApiFuture, CatalogApi};
pub use credentials::{CredentialError, CredentialStore, MemoryCredentialStore};
pub use memory::MemoryCatalog;
pub use model::{Book, BookDraft, Language, Publisher, Session, SignUp, User};
pub use search::{BookFilter, BookSort};
pub use service::Catalog;
