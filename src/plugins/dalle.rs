//! Image generation plugin (DALL·E 3 through the OpenAI images API).

use std::future::Future;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    CreateImageRequestArgs, Image, ImageModel, ImageQuality, ImageResponseFormat, ImageSize, ImageStyle,
};
use color_eyre::{Result, eyre::WrapErr, eyre::eyre};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, instrument};

use crate::assistant::ToolArguments;

use super::plugin::{Plugin, ToolParameters, ToolParametersBuilder, optional_str, required_str};

const SIZES: &[&str] = &["1024x1024", "1792x1024", "1024x1792"];
const QUALITIES: &[&str] = &["standard", "hd"];
const STYLES: &[&str] = &["vivid", "natural"];

pub struct Dalle {
    client: Client<OpenAIConfig>,
}

impl Dalle {
    pub const NAME: &'static str = "dalle";

    pub fn new(openai_api_key: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(openai_api_key);
        Self { client: Client::with_config(config) }
    }

    #[instrument(name = "dalle_generate", skip(self, args))]
    async fn generate(&self, prompt: &str, args: &ToolArguments) -> Result<String> {
        let mut builder = CreateImageRequestArgs::default();
        builder
            .model(ImageModel::DallE3)
            .prompt(prompt)
            .n(1)
            .response_format(ImageResponseFormat::Url);
        if let Some(size) = parse_choice::<ImageSize>(args, "size", SIZES)? {
            builder.size(size);
        }
        if let Some(quality) = parse_choice::<ImageQuality>(args, "quality", QUALITIES)? {
            builder.quality(quality);
        }
        if let Some(style) = parse_choice::<ImageStyle>(args, "style", STYLES)? {
            builder.style(style);
        }
        let req = builder.build().wrap_err("building image request")?;

        let resp = self.client.images().create(req).await.wrap_err("image generation request")?;
        let image = resp.data.first().ok_or_else(|| eyre!("image API returned no images"))?;
        match image.as_ref() {
            Image::Url { url, .. } => {
                debug!(target: "plugins", %url, "dalle_image_ready");
                Ok(url.clone())
            }
            _ => Err(eyre!("image API did not return a URL")),
        }
    }
}

/// Parse an optional enum argument through its serde representation.
fn parse_choice<T: DeserializeOwned>(args: &ToolArguments, key: &str, allowed: &[&str]) -> Result<Option<T>> {
    let Some(raw) = optional_str(args, key) else {
        return Ok(None);
    };
    let lowered = raw.to_ascii_lowercase();
    if !allowed.contains(&lowered.as_str()) {
        return Err(eyre!("'{key}' must be one of {}, got '{raw}'", allowed.join(", ")));
    }
    let parsed = serde_json::from_value(Value::String(lowered)).wrap_err_with(|| format!("parsing '{key}'"))?;
    Ok(Some(parsed))
}

/// Plugin の `run` は同期呼び出しなので、現在のランタイム (ブロッキング用スレッドから) か
/// 一時ランタイムで future を完了させる。
fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => Ok(Runtime::new()?.block_on(fut)),
    }
}

impl Plugin for Dalle {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Generate an image from a textual description with DALL·E 3 and return its URL."
    }

    fn parameters(&self) -> ToolParameters {
        ToolParametersBuilder::new_object()
            .add_string("prompt", Some("Detailed description of the image to generate."))
            .add_enum("size", Some("Image size"), SIZES)
            .add_enum("quality", Some("Image quality"), QUALITIES)
            .add_enum("style", Some("Image style"), STYLES)
            .required("prompt")
            .additional_properties(false)
            .build()
    }

    fn run(&self, args: &ToolArguments) -> Result<String> {
        let prompt = required_str(args, "prompt")?;
        // 引数の検証はネットワークに出る前に済ませる
        parse_choice::<ImageSize>(args, "size", SIZES)?;
        parse_choice::<ImageQuality>(args, "quality", QUALITIES)?;
        parse_choice::<ImageStyle>(args, "style", STYLES)?;
        block_on(self.generate(prompt, args))?
    }
}
