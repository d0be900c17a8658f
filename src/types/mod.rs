mod news;
pub use news::*;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown news status `{0}`")]
    UnknownStatus(String),
    #[error("unknown news source `{0}`")]
    UnknownSource(String),
}
