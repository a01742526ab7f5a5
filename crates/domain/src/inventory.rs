//! Book inventory records and copy-count rules.

use common::{BookId, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest copy count a book may carry; the count columns are 32-bit signed.
pub const MAX_COPIES: u32 = i32::MAX as u32;

/// Errors raised by inventory mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// Title or author is blank, or the copy count is out of range.
    #[error("Invalid book: {0}")]
    InvalidBook(&'static str),

    /// No copy left to hand out.
    #[error("No available copies of book {book_id}")]
    InsufficientCopies { book_id: BookId },

    /// A returned copy would push availability past the total.
    #[error("Book {book_id} would exceed its {total_copies} total copies")]
    OverCapacity { book_id: BookId, total_copies: u32 },

    /// The new total is smaller than the number of copies currently out.
    #[error("Book {book_id} has {on_loan} copies on loan, cannot reduce total to {requested}")]
    CopiesOnLoan {
        book_id: BookId,
        on_loan: u32,
        requested: u32,
    },

    /// Stored counts violate `available <= total`.
    #[error("Inconsistent copy counts for book {book_id}: {available} available of {total}")]
    InconsistentCounts {
        book_id: BookId,
        total: u32,
        available: u32,
    },
}

/// Input for adding a title to the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub total_copies: u32,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>, total_copies: u32) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            total_copies,
        }
    }
}

/// Partial update of a book; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookUpdate {
    pub title: Option<String>,
    pub author: Option<String>,
    pub total_copies: Option<u32>,
}

impl BookUpdate {
    pub fn total_copies(total_copies: u32) -> Self {
        Self {
            total_copies: Some(total_copies),
            ..Default::default()
        }
    }
}

/// A title in the inventory with its copy counts.
///
/// The counts are private so that every change goes through a method that
/// keeps `0 <= available_copies <= total_copies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    total_copies: u32,
    available_copies: u32,
    pub version: Version,
}

impl Book {
    /// Creates a new book with every copy available.
    pub fn create(new: NewBook) -> Result<Self, InventoryError> {
        Ok(Self {
            id: BookId::new(),
            title: non_blank(new.title, "title must not be blank")?,
            author: non_blank(new.author, "author must not be blank")?,
            total_copies: copy_count(new.total_copies)?,
            available_copies: new.total_copies,
            version: Version::initial(),
        })
    }

    /// Rebuilds a book from stored fields, checking the copy-count invariant.
    pub fn restore(
        id: BookId,
        title: String,
        author: String,
        total_copies: u32,
        available_copies: u32,
        version: Version,
    ) -> Result<Self, InventoryError> {
        if available_copies > total_copies {
            return Err(InventoryError::InconsistentCounts {
                book_id: id,
                total: total_copies,
                available: available_copies,
            });
        }
        Ok(Self {
            id,
            title,
            author,
            total_copies,
            available_copies,
            version,
        })
    }

    pub fn total_copies(&self) -> u32 {
        self.total_copies
    }

    pub fn available_copies(&self) -> u32 {
        self.available_copies
    }

    /// Number of copies currently out on loan.
    pub fn copies_on_loan(&self) -> u32 {
        self.total_copies - self.available_copies
    }

    pub fn is_available(&self) -> bool {
        self.available_copies > 0
    }

    /// Applies an update. Nothing changes if any field is rejected.
    ///
    /// A new total shifts availability by the same amount so the number of
    /// copies on loan is preserved. Totals below that number are refused.
    pub fn apply_update(&mut self, update: BookUpdate) -> Result<(), InventoryError> {
        let title = update
            .title
            .map(|t| non_blank(t, "title must not be blank"))
            .transpose()?;
        let author = update
            .author
            .map(|a| non_blank(a, "author must not be blank"))
            .transpose()?;

        let available = match update.total_copies.map(copy_count).transpose()? {
            Some(total) => {
                let on_loan = self.copies_on_loan();
                if total < on_loan {
                    return Err(InventoryError::CopiesOnLoan {
                        book_id: self.id,
                        on_loan,
                        requested: total,
                    });
                }
                Some((total, total - on_loan))
            }
            None => None,
        };

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(author) = author {
            self.author = author;
        }
        if let Some((total, available)) = available {
            self.total_copies = total;
            self.available_copies = available;
        }
        Ok(())
    }

    /// Takes one copy off the shelf.
    pub fn decrement_available(&mut self) -> Result<(), InventoryError> {
        if self.available_copies == 0 {
            return Err(InventoryError::InsufficientCopies { book_id: self.id });
        }
        self.available_copies -= 1;
        Ok(())
    }

    /// Puts one copy back on the shelf.
    pub fn increment_available(&mut self) -> Result<(), InventoryError> {
        if self.available_copies >= self.total_copies {
            return Err(InventoryError::OverCapacity {
                book_id: self.id,
                total_copies: self.total_copies,
            });
        }
        self.available_copies += 1;
        Ok(())
    }
}

fn copy_count(total: u32) -> Result<u32, InventoryError> {
    if total > MAX_COPIES {
        return Err(InventoryError::InvalidBook("total_copies is too large"));
    }
    Ok(total)
}

fn non_blank(value: String, message: &'static str) -> Result<String, InventoryError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InventoryError::InvalidBook(message));
    }
    Ok(trimmed.to_string())
}
