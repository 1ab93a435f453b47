//! Favorites: the persisted table and the detail-view controller that keeps
//! it consistent with the image cache.

pub mod controller;
pub mod store;

pub use controller::{DetailContext, DetailError, FavoriteState};
pub use store::{FavoriteEntry, FavoritesStore, JsonFavoritesStore};
