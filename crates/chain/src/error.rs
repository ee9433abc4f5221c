use emberd_storage::StoreError;

/// Result codes produced by the organizers and the chain store.
///
/// `InvalidHeader`/`InvalidBlock` are sticky: the failing position and its
/// candidate ancestry are marked in the store and every later admission of
/// the same chain short-circuits. Mempool rejections are not sticky.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChainError {
    ServiceStopped,
    DuplicateBlock,
    DuplicateTransaction,
    InsufficientWork,
    InsufficientFee,
    DustyTransaction,
    InvalidHeader(&'static str),
    InvalidBlock(&'static str),
    InvalidTransaction(&'static str),
    OperationFailed,
    /// A write batch failed part-way; the store contents are undefined.
    StoreCorrupted,
}

impl ChainError {
    /// Stable wire code, also persisted as the sticky invalid marker.
    pub fn code(&self) -> u8 {
        match self {
            ChainError::ServiceStopped => 1,
            ChainError::DuplicateBlock => 2,
            ChainError::DuplicateTransaction => 3,
            ChainError::InsufficientWork => 4,
            ChainError::InsufficientFee => 5,
            ChainError::DustyTransaction => 6,
            ChainError::InvalidHeader(_) => 7,
            ChainError::InvalidBlock(_) => 8,
            ChainError::InvalidTransaction(_) => 9,
            ChainError::OperationFailed => 10,
            ChainError::StoreCorrupted => 11,
        }
    }

    /// Rebuild from a persisted code byte; messages are not stored.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ChainError::ServiceStopped),
            2 => Some(ChainError::DuplicateBlock),
            3 => Some(ChainError::DuplicateTransaction),
            4 => Some(ChainError::InsufficientWork),
            5 => Some(ChainError::InsufficientFee),
            6 => Some(ChainError::DustyTransaction),
            7 => Some(ChainError::InvalidHeader("previously marked invalid")),
            8 => Some(ChainError::InvalidBlock("previously marked invalid")),
            9 => Some(ChainError::InvalidTransaction("previously marked invalid")),
            10 => Some(ChainError::OperationFailed),
            11 => Some(ChainError::StoreCorrupted),
            _ => None,
        }
    }

    /// Consensus invalidity that must be recorded against the chain.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidHeader(_)
                | ChainError::InvalidBlock(_)
                | ChainError::InvalidTransaction(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::StoreCorrupted)
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::ServiceStopped => write!(f, "service stopped"),
            ChainError::DuplicateBlock => write!(f, "duplicate block"),
            ChainError::DuplicateTransaction => write!(f, "duplicate transaction"),
            ChainError::InsufficientWork => write!(f, "insufficient work"),
            ChainError::InsufficientFee => write!(f, "insufficient fee"),
            ChainError::DustyTransaction => write!(f, "dusty transaction"),
            ChainError::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            ChainError::InvalidBlock(message) => write!(f, "invalid block: {message}"),
            ChainError::InvalidTransaction(message) => {
                write!(f, "invalid transaction: {message}")
            }
            ChainError::OperationFailed => write!(f, "operation failed"),
            ChainError::StoreCorrupted => write!(f, "store corrupted"),
        }
    }
}

impl std::error::Error for ChainError {}

impl From<StoreError> for ChainError {
    fn from(_: StoreError) -> Self {
        // Read-path failures; writers map their own errors to StoreCorrupted.
        ChainError::OperationFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        let errors = [
            ChainError::ServiceStopped,
            ChainError::DuplicateBlock,
            ChainError::DuplicateTransaction,
            ChainError::InsufficientWork,
            ChainError::OperationFailed,
            ChainError::StoreCorrupted,
        ];
        for error in errors {
            let code = error.code();
            assert_eq!(ChainError::from_code(code).expect("code").code(), code);
        }
    }

    #[test]
    fn stickiness() {
        assert!(ChainError::InvalidBlock("x").is_sticky());
        assert!(ChainError::InvalidHeader("x").is_sticky());
        assert!(!ChainError::InsufficientFee.is_sticky());
        assert!(!ChainError::InsufficientWork.is_sticky());
    }
}
