pub mod auth_client;

pub use auth_client::{HttpTokenRefresher, NoRefresh, RefreshFuture, RefreshedTokens, TokenRefresher};
