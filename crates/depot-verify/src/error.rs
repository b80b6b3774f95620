#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("algorithm invalid: '{0}'")]
    AlgorithmInvalid(String),

    #[error("checksum missing or invalid: expected '{expected}', got '{actual}'")]
    ChecksumInvalid { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, VerifyError>;
