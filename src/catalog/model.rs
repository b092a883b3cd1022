use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A book record as served by the catalog backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub isbn13: String,
    pub language_id: i64,
    pub num_pages: u32,
    pub publication_date: NaiveDate,
    pub publisher_id: i64,
}

/// The writable fields of a [`Book`], used for create and update requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDraft {
    pub title: String,
    pub isbn13: String,
    pub language_id: i64,
    pub num_pages: u32,
    pub publication_date: NaiveDate,
    pub publisher_id: i64,
}

impl BookDraft {
    /// Builds the stored record for this draft.
    #[must_use]
    pub fn into_book(self, id: i64) -> Book {
        Book {
            id,
            title: self.title,
            isbn13: self.isbn13,
            language_id: self.language_id,
            num_pages: self.num_pages,
            publication_date: self.publication_date,
            publisher_id: self.publisher_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub id: i64,
    pub publisher_name: String,
    pub incorporation_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: i64,
    pub language_name: String,
}

/// The signed-in user, stored as JSON in the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A new account's details, sent when signing up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUp {
    pub first_name: String,
    pub last_name: String,
    pub birthdate: NaiveDate,
    pub email: String,
    pub password: String,
}

/// Result of a successful login or sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub user: User,
}
