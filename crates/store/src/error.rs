#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] libsql::Error),

    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("column {0} had an unexpected shape in row {1}")]
    MalformedRow(&'static str, &'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
