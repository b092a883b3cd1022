//! Catalog example demonstrating shared queries and mutation-driven refetch.
//!
//! This example shows:
//! - Two views subscribed to the same book list sharing one fetch
//! - A filtered list living under the `books` prefix
//! - Signing in, which refreshes the active user
//! - Deleting a book, which refreshes every open book list
//!
//! The backend is the in-memory [`MemoryCatalog`], so nothing leaves the process.
//!
//! Run with: `RUST_LOG=folio=debug cargo run --example catalog`

use std::sync::Arc;

use chrono::NaiveDate;
use color_eyre::eyre::{Result, eyre};
use folio::catalog::{
    Book, BookDraft, BookFilter, BookSort, Catalog, CatalogApi, Language, MemoryCatalog,
    MemoryCredentialStore, Publisher, User, keys,
};
use folio::{FetchError, MutationOptions, QueryClient, QueryConfig, QueryResult};
use futures::{FutureExt, StreamExt};
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| eyre!("invalid date {year}-{month}-{day}"))
}

/// Fills the backend with a few records and returns the stored books.
fn seed(backend: &MemoryCatalog) -> Result<Vec<Book>> {
    backend.insert_publisher(Publisher {
        id: 1,
        publisher_name: "Chilton Books".to_string(),
        incorporation_date: date(1904, 1, 1)?,
    });
    backend.insert_language(Language {
        id: 1,
        language_name: "English".to_string(),
    });
    backend.insert_account(
        User {
            id: 1,
            email: "librarian@example.com".to_string(),
            first_name: "Lin".to_string(),
            last_name: "Brarian".to_string(),
        },
        "secret",
    );

    let mut books = Vec::new();
    for (title, isbn13, pages, published) in [
        ("Dune", "9780441013593", 412, date(1965, 8, 1)?),
        ("Dune Messiah", "9780593098233", 256, date(1969, 10, 15)?),
        ("Emma", "9780141439587", 474, date(1815, 12, 23)?),
    ] {
        books.push(backend.insert_book(BookDraft {
            title: title.to_string(),
            isbn13: isbn13.to_string(),
            language_id: 1,
            num_pages: pages,
            publication_date: published,
            publisher_id: 1,
        }));
    }
    Ok(books)
}

fn describe<T>(view: &str, result: &QueryResult<Vec<T>>) {
    println!(
        "[{view}] {:?}{} {} item(s)",
        result.status,
        if result.is_stale() { " (stale)" } else { "" },
        result.data().map_or(0, Vec::len),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = Arc::new(MemoryCredentialStore::new());
    let backend = MemoryCatalog::new(store.clone());
    let books = seed(&backend)?;

    let client = QueryClient::with_config(
        QueryConfig::default()
            .with_stale_time(Duration::from_secs(30))
            .with_cache_time(Duration::from_secs(60)),
    );
    let catalog = Catalog::new(client.clone(), Arc::new(backend.clone()), store);

    // Two views of the same list: one fetch between them.
    let _table = catalog.books(|result| describe("table", result));
    let _counter = catalog.books(|result| describe("counter", result));
    let _search = catalog.search_books(
        BookFilter::new("dune", BookSort::PublicationDate),
        |result| describe("search", result),
    );
    let _user = catalog.active_user(|result| match result.data() {
        Some(Some(user)) => println!("[user] {} {}", user.first_name, user.last_name),
        Some(None) => println!("[user] signed out"),
        None => println!("[user] {:?}", result.status),
    });

    // A stream works as well as a callback.
    let mut languages = client.watch(keys::languages(), {
        let backend = backend.clone();
        move || {
            backend
                .list_languages()
                .map(|r| r.map_err(FetchError::from))
                .boxed()
        }
    });
    while let Some(result) = languages.next().await {
        describe("languages", &result);
        if result.is_success() || result.is_error() {
            break;
        }
    }

    let session = catalog
        .login("librarian@example.com", "secret", MutationOptions::new())
        .settled()
        .await;
    if let Some(error) = session.error() {
        return Err(eyre!("sign-in failed: {error}"));
    }

    let target = books
        .iter()
        .find(|book| book.title == "Emma")
        .map(|book| book.id)
        .ok_or_else(|| eyre!("seeded book missing"))?;

    let deleted = catalog
        .delete_book(
            target,
            MutationOptions::new().on_success(move |_| println!("deleted book {target}")),
        )
        .settled()
        .await;
    if let Some(error) = deleted.error() {
        return Err(eyre!("delete failed: {error}"));
    }

    // Let the refetches land before exiting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!(
        "{} cached queries, {} backend requests, {} books left",
        client.len(),
        backend.requests(),
        backend.book_count()
    );
    Ok(())
}
