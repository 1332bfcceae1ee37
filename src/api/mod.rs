//! Remote code-review API access
//!
//! - [`ReviewApi`] - the calls the fetch layer needs (list, search, org repos,
//!   GraphQL, per-item detail)
//! - [`GithubClient`] - reqwest implementation that feeds rate limit headers
//!   into the shared quota tracker
//! - [`MockReviewApi`] - canned in-memory implementation for tests

mod client;
mod github;
mod headers;
mod mock;

pub use client::{GraphqlError, GraphqlResponse, Page, ReviewApi};
pub use github::{
    DEFAULT_BASE_URL, DEFAULT_GRAPHQL_URL, DEFAULT_TOKEN_ENV, GithubClient, GithubConfig, classify_status,
    pull_from_json,
};
pub use headers::{is_core_resource, parse_rate_limit_headers, parse_rate_limit_resource, parse_retry_after};
pub use mock::MockReviewApi;
