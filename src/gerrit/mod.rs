//! Gerrit REST access: paginated change listing and change normalization.

mod api_types;
mod client;
mod normalize;
mod query;

pub use api_types::{ApiChange, ApiChangeHeader, RawChange};
pub use client::{ChangeSource, GerritClient};
pub use normalize::{normalize, SizePolicy};
pub use query::ChangeQuery;

#[cfg(test)]
pub(crate) use client::{collect_pages, parse_page};
