use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO during {op} at offset {offset}: {source}")]
    IoAt {
        op: &'static str,
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Persist: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("allocation of {bytes} bytes for {what} failed")]
    Alloc { what: &'static str, bytes: usize },

    #[error("corrupt block: bucket {bucket}{} at offset {offset}: {reason}", batch_suffix(.batch))]
    CorruptBlock {
        bucket: u64,
        batch: Option<u64>,
        offset: u64,
        reason: String,
    },

    #[error("memory budget of {budget} bytes is below the {needed} bytes a batch needs")]
    BudgetTooSmall { needed: u64, budget: u64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("verification failed: {0}")]
    VerificationFailed(String),
}

fn batch_suffix(batch: &Option<u64>) -> String {
    batch.map(|b| format!(" (batch {b})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, PlotError>;

/// Attach the failing operation and byte offset to an I/O error.
pub trait IoContext<T> {
    fn at(self, op: &'static str, offset: u64) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, op: &'static str, offset: u64) -> Result<T> {
        self.map_err(|source| PlotError::IoAt { op, offset, source })
    }
}

pub(crate) fn alloc_vec(what: &'static str, bytes: usize) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(bytes)
        .map_err(|_| PlotError::Alloc { what, bytes })?;
    Ok(v)
}
