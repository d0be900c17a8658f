mod news_record;
pub use news_record::*;

mod pg_queries;
pub use pg_queries::*;
