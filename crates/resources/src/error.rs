use meshop_kubehub::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not encode managed object")]
    Encode(#[from] StoreError),
    #[error("invalid heartbeat schedule {0:?}: expected five cron fields")]
    Schedule(String),
}
