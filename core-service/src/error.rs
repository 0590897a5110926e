use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),

    #[error(transparent)]
    DataSource(#[from] core_datasource::DataSourceError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
