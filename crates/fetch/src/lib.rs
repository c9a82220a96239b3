pub mod render;
pub mod static_fetch;
pub mod trigger;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use sift_core::config::{FetchConfig, RenderConfig};
use sift_core::{FetchOptions, FetchOutcome, PageFetcher, RenderPolicy, SiftError};

use render::HeadlessRenderer;
use static_fetch::StaticClient;

/// Static HTTP fetch with a headless-render fallback. The render policy
/// decides the path: `never` and `always` are unconditional, `auto` runs
/// the static fetch and falls back to the renderer when the body looks
/// like a script-driven shell.
pub struct AdaptiveFetcher {
    static_client: StaticClient,
    renderer: Option<HeadlessRenderer>,
}

impl AdaptiveFetcher {
    pub fn new(
        fetch_config: &FetchConfig,
        render_config: &RenderConfig,
        user_agent: &str,
    ) -> Result<Self, SiftError> {
        let static_client = StaticClient::new(fetch_config, user_agent)?;
        let renderer = render_config
            .enabled
            .then(|| HeadlessRenderer::new(render_config.clone(), user_agent));
        Ok(Self { static_client, renderer })
    }
}

#[async_trait]
impl PageFetcher for AdaptiveFetcher {
    async fn fetch(&self, url: &Url, opts: &FetchOptions) -> Result<FetchOutcome, SiftError> {
        match opts.render {
            RenderPolicy::Never => self.static_client.fetch(url, opts).await,
            RenderPolicy::Always => match &self.renderer {
                Some(renderer) => renderer.render(url).await,
                None => Err(SiftError::Render("headless rendering is disabled".into())),
            },
            RenderPolicy::Auto => {
                let outcome = self.static_client.fetch(url, opts).await?;
                let Some(renderer) = &self.renderer else {
                    return Ok(outcome);
                };
                if trigger::needs_render(&outcome.body) {
                    debug!(url = %url, "static body looks script-driven, rendering");
                    return renderer.render(&outcome.final_url).await;
                }
                Ok(outcome)
            }
        }
    }
}
