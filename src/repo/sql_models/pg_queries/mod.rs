mod news;
pub use news::*;
