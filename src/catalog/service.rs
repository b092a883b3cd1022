use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{FetchError, MutationError};
use crate::mutation::{MutationCoordinator, MutationHandle, MutationOptions};
use crate::query::{QueryClient, QueryResult, Subscription};

use super::api::{ApiFuture, CatalogApi};
use super::credentials::{self, CredentialStore};
use super::keys;
use super::model::{Book, BookDraft, Language, Publisher, Session, SignUp, User};
use super::search::BookFilter;

fn fetch<T: Send + 'static>(request: ApiFuture<T>) -> BoxFuture<'static, Result<T, FetchError>> {
    request.map(|result| result.map_err(FetchError::from)).boxed()
}

fn read_active_user(store: &dyn CredentialStore) -> Result<Option<User>, FetchError> {
    let Some(json) = store
        .get(credentials::ACTIVE_USER)
        .map_err(FetchError::from_source)?
    else {
        return Ok(None);
    };
    serde_json::from_str(&json)
        .map(Some)
        .map_err(FetchError::from_source)
}

fn store_active_user(store: &dyn CredentialStore, user: &User) -> Result<(), MutationError> {
    let json = serde_json::to_string(user).map_err(MutationError::from_source)?;
    store
        .set(credentials::ACTIVE_USER, &json)
        .map_err(MutationError::from_source)
}

/// Persists the token and the user of a fresh session.
fn store_session(store: &dyn CredentialStore, session: &Session) -> Result<(), MutationError> {
    store
        .set(credentials::ACCESS_TOKEN, &session.access_token)
        .map_err(MutationError::from_source)?;
    store_active_user(store, &session.user)
}

/// The catalog's reads and writes, wired through the query cache.
///
/// Every list, detail, and profile view subscribes through this type, and
/// every write invalidates the keys whose data it changes.
#[derive(Clone)]
pub struct Catalog {
    queries: QueryClient,
    mutations: MutationCoordinator,
    api: Arc<dyn CatalogApi>,
    credentials: Arc<dyn CredentialStore>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("queries", &self.queries)
            .finish_non_exhaustive()
    }
}

impl Catalog {
    /// Creates a catalog that caches in `queries`, talks to `api`, and keeps
    /// the session in `credentials`.
    #[must_use]
    pub fn new(
        queries: QueryClient,
        api: Arc<dyn CatalogApi>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            mutations: MutationCoordinator::new(queries.clone()),
            queries,
            api,
            credentials,
        }
    }

    /// The query client backing every read.
    #[must_use]
    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    /// The coordinator running every write.
    #[must_use]
    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    // ===== Reads =====

    /// Subscribes to every book, ordered by id.
    pub fn books<L>(&self, on_change: L) -> Subscription<Vec<Book>>
    where
        L: Fn(&QueryResult<Vec<Book>>) + Send + Sync + 'static,
    {
        let api = self.api.clone();
        self.queries
            .subscribe(keys::books(), move || fetch(api.list_books()), on_change)
    }

    /// Subscribes to one book's details.
    pub fn book<L>(&self, id: i64, on_change: L) -> Subscription<Book>
    where
        L: Fn(&QueryResult<Book>) + Send + Sync + 'static,
    {
        let api = self.api.clone();
        self.queries
            .subscribe(keys::book(id), move || fetch(api.get_book(id)), on_change)
    }

    /// Subscribes to the books matching `filter`, in its sort order.
    pub fn search_books<L>(&self, filter: BookFilter, on_change: L) -> Subscription<Vec<Book>>
    where
        L: Fn(&QueryResult<Vec<Book>>) + Send + Sync + 'static,
    {
        let api = self.api.clone();
        let key = keys::filtered_books(&filter);
        self.queries.subscribe(
            key,
            move || {
                let filter = filter.clone();
                fetch(api.list_books())
                    .map(move |result| result.map(|books| filter.apply(books)))
                    .boxed()
            },
            on_change,
        )
    }

    /// Subscribes to the publisher list.
    pub fn publishers<L>(&self, on_change: L) -> Subscription<Vec<Publisher>>
    where
        L: Fn(&QueryResult<Vec<Publisher>>) + Send + Sync + 'static,
    {
        let api = self.api.clone();
        self.queries.subscribe(
            keys::publishers(),
            move || fetch(api.list_publishers()),
            on_change,
        )
    }

    /// Subscribes to the language list.
    pub fn languages<L>(&self, on_change: L) -> Subscription<Vec<Language>>
    where
        L: Fn(&QueryResult<Vec<Language>>) + Send + Sync + 'static,
    {
        let api = self.api.clone();
        self.queries.subscribe(
            keys::languages(),
            move || fetch(api.list_languages()),
            on_change,
        )
    }

    /// Subscribes to the signed-in user, read from the credential store.
    /// The data is `None` while nobody is signed in.
    pub fn active_user<L>(&self, on_change: L) -> Subscription<Option<User>>
    where
        L: Fn(&QueryResult<Option<User>>) + Send + Sync + 'static,
    {
        let store = self.credentials.clone();
        self.queries.subscribe(
            keys::active_user(),
            move || {
                let store = store.clone();
                async move { read_active_user(store.as_ref()) }.boxed()
            },
            on_change,
        )
    }

    // ===== Writes =====

    /// Creates a book and refreshes every book list.
    pub fn create_book(
        &self,
        draft: BookDraft,
        options: MutationOptions<Book>,
    ) -> MutationHandle<Book> {
        let api = self.api.clone();
        self.mutations.mutate(
            move || {
                api.create_book(draft)
                    .map(|r| r.map_err(MutationError::from))
                    .boxed()
            },
            options.invalidates(keys::books()),
        )
    }

    /// Updates a book and refreshes every book list and its detail view.
    pub fn update_book(
        &self,
        id: i64,
        draft: BookDraft,
        options: MutationOptions<Book>,
    ) -> MutationHandle<Book> {
        let api = self.api.clone();
        self.mutations.mutate(
            move || {
                api.update_book(id, draft)
                    .map(|r| r.map_err(MutationError::from))
                    .boxed()
            },
            options
                .invalidates(keys::books())
                .invalidates(keys::book(id)),
        )
    }

    /// Deletes a book, drops its detail entry, and refreshes every book list.
    pub fn delete_book(&self, id: i64, options: MutationOptions<()>) -> MutationHandle<()> {
        let api = self.api.clone();
        let queries = self.queries.clone();
        self.mutations.mutate(
            move || {
                async move {
                    api.delete_book(id).await?;
                    queries.remove(&keys::book(id));
                    Ok::<_, MutationError>(())
                }
                .boxed()
            },
            options.invalidates(keys::books()),
        )
    }

    /// Signs in, stores the token and the user, and refreshes the active user.
    pub fn login(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
        options: MutationOptions<Session>,
    ) -> MutationHandle<Session> {
        let api = self.api.clone();
        let store = self.credentials.clone();
        let (email, password) = (email.into(), password.into());
        self.mutations.mutate(
            move || {
                async move {
                    let session = api.login(email, password).await?;
                    store_session(store.as_ref(), &session)?;
                    debug!(user = session.user.id, "signed in");
                    Ok::<_, MutationError>(session)
                }
                .boxed()
            },
            options.invalidates(keys::active_user()),
        )
    }

    /// Registers an account, signs it in like [`login`](Self::login), and
    /// refreshes the active user.
    pub fn sign_up(
        &self,
        sign_up: SignUp,
        options: MutationOptions<Session>,
    ) -> MutationHandle<Session> {
        let api = self.api.clone();
        let store = self.credentials.clone();
        self.mutations.mutate(
            move || {
                async move {
                    let session = api.sign_up(sign_up).await?;
                    store_session(store.as_ref(), &session)?;
                    debug!(user = session.user.id, "signed up");
                    Ok::<_, MutationError>(session)
                }
                .boxed()
            },
            options.invalidates(keys::active_user()),
        )
    }

    /// Replaces the stored active user and refreshes its subscribers.
    pub fn set_active_user(
        &self,
        user: User,
        options: MutationOptions<User>,
    ) -> MutationHandle<User> {
        let store = self.credentials.clone();
        self.mutations.mutate(
            move || {
                async move {
                    store_active_user(store.as_ref(), &user)?;
                    Ok::<_, MutationError>(user)
                }
                .boxed()
            },
            options.invalidates(keys::active_user()),
        )
    }

    /// Forgets the token and the active user.
    pub fn logout(&self, options: MutationOptions<()>) -> MutationHandle<()> {
        let store = self.credentials.clone();
        self.mutations.mutate(
            move || {
                async move {
                    store
                        .delete(credentials::ACCESS_TOKEN)
                        .map_err(MutationError::from_source)?;
                    store
                        .delete(credentials::ACTIVE_USER)
                        .map_err(MutationError::from_source)?;
                    debug!("signed out");
                    Ok::<_, MutationError>(())
                }
                .boxed()
            },
            options.invalidates(keys::active_user()),
        )
    }
}
