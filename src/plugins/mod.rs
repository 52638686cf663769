//! Plugins module aggregator.
//!
//! Each plugin is an independent capability object implementing `Plugin`;
//! `PluginRegistry` resolves tool calls by name.

mod plugin; // Plugin trait, ToolParameters, builders
mod registry; // name -> plugin, ToolResolution
mod dalle; // image generation
mod web_search; // tavily search
mod url_viewer; // page fetch

pub use plugin::{Plugin, ToolParameters, ToolParametersBuilder, optional_str, required_str};
pub use dalle::Dalle;
pub use registry::{PluginRegistry, ToolResolution};
pub use url_viewer::{EMPTY_PAGE_TEXT, UrlViewer, page_text};
pub use web_search::WebSearch;

use crate::config::Config;

/// 起動時に利用可能なプラグインを全て登録したレジストリを作る
pub fn default_registry(config: &Config) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    registry
        .register(WebSearch::new(config.tavily_api_key.clone()))
        .register(UrlViewer::new());
    if let Some(key) = config.openai_api_key.as_deref() {
        registry.register(Dalle::new(key));
    }
    registry
}
