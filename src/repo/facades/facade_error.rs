use crate::{docstore, repo};

#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("unable to find data: {0}")]
    NotFound(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("repository error :: {0}")]
    RepositoryError(repo::Error),
    #[error("document store error :: {0}")]
    DocumentStoreError(#[from] docstore::Error),
}

impl From<repo::Error> for FacadeError {
    fn from(value: repo::Error) -> Self {
        match value {
            repo::Error::NotFound(id) => Self::NotFound(format!("news item {id}")),
            other => Self::RepositoryError(other),
        }
    }
}
