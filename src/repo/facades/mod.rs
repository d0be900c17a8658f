//! # Facade Module
//!
//! This module implements the **Facade** pattern, serving as an intermediate logic layer
//! between the application's public interface and the underlying persistence providers.
//!
//! * **Database Abstraction:** Facades talk to the relational store through the
//!   [`NewsRecords`](super::NewsRecords) seam and never expose raw database rows.
//! * **Coordinated Logic:** They manage multi-step operations, such as an authoritative
//!   write in the relational store followed by the refresh of the public projection
//!   held by the [`docstore`](crate::docstore).
//! * **Encapsulation:** The rest of the system works with high-level entities like
//!   [`FacadeNews`] instead of issuing queries directly.

mod facade_error;
pub use facade_error::*;

mod facade_news;
pub use facade_news::*;
