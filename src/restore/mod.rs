// dbmagic/src/restore/mod.rs
//! Import side of the archive pipeline.

mod logic;
pub(crate) mod db_restore;

pub use logic::{import_database, import_storage};
