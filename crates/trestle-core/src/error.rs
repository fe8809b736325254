use thiserror::Error;

use crate::matrix::MatrixError;
use crate::network::NetworkError;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The sender has no usable remote login and the portal has no relay.
    #[error("user is not logged into the remote network")]
    NotLoggedIn,
    #[error("database error: {0}")]
    Database(#[from] trestle_db::DbError),
    #[error("homeserver error: {0}")]
    Matrix(#[from] MatrixError),
    #[error("remote network error: {0}")]
    Network(#[from] NetworkError),
    #[error("internal error: {0}")]
    Internal(String),
}
