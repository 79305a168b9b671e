// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Relational storage of news records.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryNewsStore;
pub use sql::SqlNewsStore;
pub use traits::{NewsStore, StorageError};
