//! Persistence for the collected corpus
//!
//! Final files are replaced atomically; in-progress pairs accumulate in
//! append-only staging files until they complete.

mod layout;
mod social;
mod staging;
mod writer;

pub use layout::{file_safe, OutputLayout};
pub use social::{dedup_posts, read_social_csv, write_social_csv, SocialRow, SOCIAL_COLUMNS};
pub use staging::StagingFile;
pub use writer::{read_json, read_jsonl, write_atomic, write_json, write_jsonl};
