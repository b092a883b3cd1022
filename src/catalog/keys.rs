//! Query keys used by the catalog.
//!
//! Every list view of books lives under the `books` prefix, so invalidating
//! [`books`] after a write refreshes the plain list and all filtered views.

use crate::key::QueryKey;

use super::search::BookFilter;

pub const BOOKS: &str = "books";
pub const BOOK: &str = "book";
pub const PUBLISHERS: &str = "publishers";
pub const LANGUAGES: &str = "book_language";
pub const ACTIVE_USER: &str = "activeUser";

/// All books, and the prefix of every filtered book list.
#[must_use]
pub fn books() -> QueryKey {
    QueryKey::new(BOOKS)
}

/// A single book's detail view.
#[must_use]
pub fn book(id: i64) -> QueryKey {
    QueryKey::new(BOOK).with(id)
}

/// A searched and sorted book list.
#[must_use]
pub fn filtered_books(filter: &BookFilter) -> QueryKey {
    books()
        .with("filtered")
        .with(filter.search.trim().to_lowercase())
        .with(filter.sort.to_string())
}

/// Every publisher, for the book form's picker.
#[must_use]
pub fn publishers() -> QueryKey {
    QueryKey::new(PUBLISHERS)
}

/// Every book language.
#[must_use]
pub fn languages() -> QueryKey {
    QueryKey::new(LANGUAGES)
}

/// The signed-in user, invalidated by every session change.
#[must_use]
pub fn active_user() -> QueryKey {
    QueryKey::new(ACTIVE_USER)
}
