//! SQLite-backed extra properties for quarry.
//!
//! ```rust,no_run
//! use common::extra_props::ExtraPropertiesStore;
//! use props_store::SqliteExtraProperties;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let props = SqliteExtraProperties::new("/var/lib/quarry/props.sqlite").await?;
//! props.store("/docs/a.pdf", "original_name", "report.pdf").await?;
//! # Ok(())
//! # }
//! ```

mod database;
mod store;

pub use database::{Database, DatabaseError};
pub use store::SqliteExtraProperties;
