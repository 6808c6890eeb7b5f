mod auth;
mod bookmarks;
pub mod dto;
pub mod response;
mod router;
mod trending;
pub mod validation;

pub use router::{AppState, create_router};
