//! Entity sources besides the library manager.
//!
//! Currently one: the user-maintained manual entries file.

pub mod manual;

pub use manual::{is_valid_mbid, ManualArtist, ManualEntries, ManualEntriesError, ManualEntriesReport};
