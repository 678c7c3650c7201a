use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Linkerd record is missing metadata.{0}")]
    MissingMetadata(&'static str),
    #[error("spec.{0} is unset after defaulting")]
    Undefaulted(&'static str),
}
