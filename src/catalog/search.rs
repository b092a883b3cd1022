//! Client-side search and ordering of book lists.

use std::fmt;

use super::model::Book;

/// Sort order for a book list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BookSort {
    #[default]
    Title,
    PublicationDate,
    Pages,
}

impl fmt::Display for BookSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Title => "title",
            Self::PublicationDate => "publication_date",
            Self::Pages => "pages",
        };
        f.write_str(name)
    }
}

/// A search term plus sort order, applied to the cached book list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BookFilter {
    pub search: String,
    pub sort: BookSort,
}

impl BookFilter {
    #[must_use]
    pub fn new(search: impl Into<String>, sort: BookSort) -> Self {
        Self {
            search: search.into(),
            sort,
        }
    }

    /// Returns `true` if `book` matches the search term.
    ///
    /// Matches the title case-insensitively or the ISBN as a substring. An
    /// empty term matches everything.
    #[must_use]
    pub fn matches(&self, book: &Book) -> bool {
        let term = self.search.trim();
        if term.is_empty() {
            return true;
        }
        let term = term.to_lowercase();
        book.title.to_lowercase().contains(&term) || book.isbn13.contains(&term)
    }

    /// Keeps matching books and orders them.
    #[must_use]
    pub fn apply(&self, books: Vec<Book>) -> Vec<Book> {
        let mut books: Vec<Book> = books.into_iter().filter(|b| self.matches(b)).collect();
        match self.sort {
            BookSort::Title => books.sort_by_key(|b| b.title.to_lowercase()),
            BookSort::PublicationDate => books.sort_by_key(|b| b.publication_date),
            BookSort::Pages => books.sort_by_key(|b| b.num_pages),
        }
        books
    }
}
