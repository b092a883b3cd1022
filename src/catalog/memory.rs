//! In-memory catalog backend.
//!
//! [`MemoryCatalog`] implements [`CatalogApi`] over process-local tables. It
//! behaves like the REST backend in the ways the cache can observe: writes
//! require the bearer token issued by [`CatalogApi::login`] and read from the
//! credential store, reads reflect every completed write, and failures can be
//! injected. It backs the tests and the demo.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use tracing::debug;

use super::api::{ApiError, ApiFuture, CatalogApi};
use super::credentials::{ACCESS_TOKEN, CredentialStore};
use super::model::{Book, BookDraft, Language, Publisher, Session, SignUp, User};

struct Account {
    password: String,
    user: User,
}

struct Tables {
    books: DashMap<i64, Book>,
    publishers: DashMap<i64, Publisher>,
    languages: DashMap<i64, Language>,
    accounts: DashMap<String, Account>,
    tokens: DashMap<String, i64>,
    credentials: Arc<dyn CredentialStore>,
    next_id: AtomicI64,
    requests: AtomicUsize,
    fail_next: AtomicBool,
}

impl Tables {
    /// Counts the request and applies an injected failure, if any.
    fn begin(&self, operation: &str) -> Result<(), ApiError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        debug!(operation, "catalog request");
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ApiError::ServerError(format!("{operation} failed")));
        }
        Ok(())
    }

    fn authorize(&self) -> Result<i64, ApiError> {
        let token = self
            .credentials
            .get(ACCESS_TOKEN)?
            .ok_or(ApiError::Unauthorized)?;
        self.tokens
            .get(&token)
            .map(|user_id| *user_id)
            .ok_or(ApiError::Unauthorized)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn issue_token(&self, user: User) -> Session {
        let access_token = format!("token-{}-{}", user.id, self.next_id());
        self.tokens.insert(access_token.clone(), user.id);
        Session { access_token, user }
    }
}

/// A catalog backend held in memory. Clones share the same tables.
#[derive(Clone)]
pub struct MemoryCatalog {
    tables: Arc<Tables>,
}

impl MemoryCatalog {
    /// Creates an empty catalog that authorizes writes with tokens read from
    /// `credentials`.
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            tables: Arc::new(Tables {
                books: DashMap::new(),
                publishers: DashMap::new(),
                languages: DashMap::new(),
                accounts: DashMap::new(),
                tokens: DashMap::new(),
                credentials,
                next_id: AtomicI64::new(1),
                requests: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
            }),
        }
    }

    /// Stores a book directly, bypassing authorization.
    pub fn insert_book(&self, draft: BookDraft) -> Book {
        let book = draft.into_book(self.tables.next_id());
        self.tables.books.insert(book.id, book.clone());
        book
    }

    pub fn insert_publisher(&self, publisher: Publisher) {
        self.tables.publishers.insert(publisher.id, publisher);
    }

    pub fn insert_language(&self, language: Language) {
        self.tables.languages.insert(language.id, language);
    }

    /// Registers an account that can sign in with `password`.
    pub fn insert_account(&self, user: User, password: impl Into<String>) {
        self.tables.accounts.insert(
            user.email.clone(),
            Account {
                password: password.into(),
                user,
            },
        );
    }

    /// Makes the next request fail with a server error.
    pub fn fail_next(&self) {
        self.tables.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of requests served, failed ones included.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.tables.requests.load(Ordering::SeqCst)
    }

    /// Number of stored books.
    #[must_use]
    pub fn book_count(&self) -> usize {
        self.tables.books.len()
    }
}

impl std::fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("books", &self.tables.books.len())
            .field("requests", &self.requests())
            .finish_non_exhaustive()
    }
}

fn sorted_by_id<T: Clone>(table: &DashMap<i64, T>) -> Vec<T> {
    let mut rows: Vec<(i64, T)> = table
        .iter()
        .map(|row| (*row.key(), row.value().clone()))
        .collect();
    rows.sort_by_key(|(id, _)| *id);
    rows.into_iter().map(|(_, row)| row).collect()
}

impl CatalogApi for MemoryCatalog {
    fn list_books(&self) -> ApiFuture<Vec<Book>> {
        let tables = self.tables.clone();
        async move {
            tables.begin("list_books")?;
            Ok(sorted_by_id(&tables.books))
        }
        .boxed()
    }

    fn get_book(&self, id: i64) -> ApiFuture<Book> {
        let tables = self.tables.clone();
        async move {
            tables.begin("get_book")?;
            tables
                .books
                .get(&id)
                .map(|book| book.clone())
                .ok_or_else(|| ApiError::NotFound(format!("book {id}")))
        }
        .boxed()
    }

    fn create_book(&self, draft: BookDraft) -> ApiFuture<Book> {
        let tables = self.tables.clone();
        async move {
            tables.begin("create_book")?;
            tables.authorize()?;
            if draft.title.trim().is_empty() {
                return Err(ApiError::InvalidRequest("title is required".to_string()));
            }
            let book = draft.into_book(tables.next_id());
            tables.books.insert(book.id, book.clone());
            Ok(book)
        }
        .boxed()
    }

    fn update_book(&self, id: i64, draft: BookDraft) -> ApiFuture<Book> {
        let tables = self.tables.clone();
        async move {
            tables.begin("update_book")?;
            tables.authorize()?;
            let mut stored = tables
                .books
                .get_mut(&id)
                .ok_or_else(|| ApiError::NotFound(format!("book {id}")))?;
            *stored = draft.into_book(id);
            Ok(stored.clone())
        }
        .boxed()
    }

    fn delete_book(&self, id: i64) -> ApiFuture<()> {
        let tables = self.tables.clone();
        async move {
            tables.begin("delete_book")?;
            tables.authorize()?;
            tables
                .books
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| ApiError::NotFound(format!("book {id}")))
        }
        .boxed()
    }

    fn list_publishers(&self) -> ApiFuture<Vec<Publisher>> {
        let tables = self.tables.clone();
        async move {
            tables.begin("list_publishers")?;
            Ok(sorted_by_id(&tables.publishers))
        }
        .boxed()
    }

    fn list_languages(&self) -> ApiFuture<Vec<Language>> {
        let tables = self.tables.clone();
        async move {
            tables.begin("list_languages")?;
            Ok(sorted_by_id(&tables.languages))
        }
        .boxed()
    }

    fn login(&self, email: String, password: String) -> ApiFuture<Session> {
        let tables = self.tables.clone();
        async move {
            tables.begin("login")?;
            let user = match tables.accounts.get(&email) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(ApiError::Unauthorized),
            };
            Ok(tables.issue_token(user))
        }
        .boxed()
    }

    fn sign_up(&self, sign_up: SignUp) -> ApiFuture<Session> {
        let tables = self.tables.clone();
        async move {
            tables.begin("sign_up")?;
            if sign_up.email.trim().is_empty() || sign_up.password.is_empty() {
                return Err(ApiError::InvalidRequest(
                    "email and password are required".to_string(),
                ));
            }
            let user = match tables.accounts.entry(sign_up.email.clone()) {
                Entry::Occupied(_) => {
                    return Err(ApiError::InvalidRequest(format!(
                        "{} is already registered",
                        sign_up.email
                    )));
                }
                Entry::Vacant(slot) => {
                    let user = User {
                        id: tables.next_id(),
                        email: sign_up.email,
                        first_name: sign_up.first_name,
                        last_name: sign_up.last_name,
                    };
                    slot.insert(Account {
                        password: sign_up.password,
                        user: user.clone(),
                    });
                    user
                }
            };
            Ok(tables.issue_token(user))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::credentials::MemoryCredentialStore;
    use chrono::NaiveDate;

    fn draft(title: &str) -> BookDraft {
        BookDraft {
            title: title.to_string(),
            isbn13: "9780000000000".to_string(),
            language_id: 1,
            num_pages: 100,
            publication_date: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            publisher_id: 1,
        }
    }

    fn reader() -> User {
        User {
            id: 10,
            email: "reader@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Reader".to_string(),
        }
    }

    #[tokio::test]
    async fn test_writes_require_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let catalog = MemoryCatalog::new(store.clone());

        let err = catalog.create_book(draft("Dune")).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));

        catalog.insert_account(reader(), "secret");
        let session = catalog
            .login("reader@example.com".to_string(), "secret".to_string())
            .await
            .unwrap();
        store.set(ACCESS_TOKEN, &session.access_token).unwrap();

        let book = catalog.create_book(draft("Dune")).await.unwrap();
        assert_eq!(catalog.get_book(book.id).await.unwrap().title, "Dune");
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let catalog = MemoryCatalog::new(Arc::new(MemoryCredentialStore::new()));
        catalog.insert_account(reader(), "secret");

        let err = catalog
            .login("reader@example.com".to_string(), "nope".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_sign_up_creates_account_once() {
        let catalog = MemoryCatalog::new(Arc::new(MemoryCredentialStore::new()));
        let sign_up = SignUp {
            first_name: "Ada".to_string(),
            last_name: "Reader".to_string(),
            birthdate: NaiveDate::from_ymd_opt(1990, 12, 10).unwrap(),
            email: "new@example.com".to_string(),
            password: "secret".to_string(),
        };

        let session = catalog.sign_up(sign_up.clone()).await.unwrap();
        assert_eq!(session.user.email, "new@example.com");
        assert_eq!(session.user.first_name, "Ada");

        let again = catalog
            .login("new@example.com".to_string(), "secret".to_string())
            .await
            .unwrap();
        assert_eq!(again.user, session.user);

        let err = catalog.sign_up(sign_up).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_list_books_sorted_by_id() {
        let catalog = MemoryCatalog::new(Arc::new(MemoryCredentialStore::new()));
        let a = catalog.insert_book(draft("A"));
        let b = catalog.insert_book(draft("B"));

        let ids: Vec<_> = catalog
            .list_books()
            .await
            .unwrap()
            .iter()
            .map(|book| book.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_fail_next_fails_once() {
        let catalog = MemoryCatalog::new(Arc::new(MemoryCredentialStore::new()));
        catalog.fail_next();

        assert!(matches!(
            catalog.list_publishers().await,
            Err(ApiError::ServerError(_))
        ));
        assert!(catalog.list_publishers().await.is_ok());
        assert_eq!(catalog.requests(), 2);
    }
}
