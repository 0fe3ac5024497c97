//! Firestore Rust SDK
//!
//! Async client for a Cloud Firestore style document database: collections,
//! documents, queries, aggregations, write batches, transactions and
//! live-update listeners, with a local cache for offline reads.
//!
//! All I/O goes through a [`Datastore`](firestore::Datastore). The crate ships
//! [`MemoryDatastore`](firestore::MemoryDatastore), an in-process backend.
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use firestore_rust_sdk::{App, AppOptions};
//! use firestore_rust_sdk::firestore::{Direction, Firestore, MapValue, MemoryDatastore};
//!
//! let app = App::create(AppOptions {
//!     api_key: "YOUR_API_KEY".to_string(),
//!     project_id: "your-project-id".to_string(),
//!     app_name: None,
//! })
//! .await?;
//! let firestore = Firestore::new(&app, MemoryDatastore::new());
//!
//! let cities = firestore.collection("cities")?;
//! cities.document("SF")?.set(MapValue::new().with("population", 870_000)).await?;
//!
//! let large = cities
//!     .where_greater_than("population", 500_000)?
//!     .order_by("population", Direction::Descending)?
//!     .get()
//!     .await?;
//! for city in &large {
//!     println!("{} => {:?}", city.id(), city.data());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod error;
pub mod firestore;

pub use app::{App, AppOptions};
pub use error::{FirebaseError, FirebaseResult, FirestoreError, PersistenceFailure};
pub use firestore::Firestore;
