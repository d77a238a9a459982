//! SQLite database for the SpaceBook server.

pub use spacebook_core::db::DatabaseError;

spacebook_core::define_database!(SpacebookDatabase, "SpaceBook database migrations complete");
