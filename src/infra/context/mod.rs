pub mod sqlite_turn_archive;

pub use sqlite_turn_archive::SqliteTurnArchive;
