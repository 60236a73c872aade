//! State module for tracking harvest progress
//!
//! This module provides the small value types shared by the store and the
//! phase driver.
//!
//! # Components
//!
//! - `WorkStatus`: Processing status of a model or year variant (pending, done, error)
//! - `VehicleCategory`: The fixed vehicle categories the catalog is split into
//! - `YearCode`: A parsed `"<year>-<fuelCode>"` year-variant code
//! - `CatalogEntry` / `YearEntry`: Child listings as returned by the remote API

mod category;
mod listing;
mod work_status;
mod year_code;

// Re-export main types
pub use category::VehicleCategory;
pub use listing::{CatalogEntry, YearEntry};
pub use work_status::WorkStatus;
pub use year_code::{YearCode, YearCodeError};
