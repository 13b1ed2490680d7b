//! External tool collaborators advertised to the completion provider.
//!
//! Currently a single capability: web search.

mod error;
mod web_search;

pub use error::{Result, ToolError};
pub use web_search::{
    SearchOptions, SearchProvider, SearchResponse, SearchResult, SearxClient, WebSearch,
    WEB_SEARCH_TOOL_NAME,
};
