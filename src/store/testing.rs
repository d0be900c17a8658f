//! Helpers to build throwaway stores.
use std::path::PathBuf;

use super::{Error, Store};
use crate::params;

/// Local filesystem store rooted in a fresh directory under the system temp dir.
pub fn new_random_on_tmp() -> Result<(Store, PathBuf), Error> {
    let root = std::env::temp_dir().join(format!("newsd-{}", uuid::Uuid::new_v4().simple()));
    let location = url::Url::from_directory_path(&root)
        .map_err(|_| Error::Unsupported("non absolute temp dir"))?;

    let store = Store::try_from_url(location.as_str(), params::configurables())?;
    Ok((store, root))
}
