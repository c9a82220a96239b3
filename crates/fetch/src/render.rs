use std::time::{Duration, Instant};

use headless_chrome::{Browser, LaunchOptionsBuilder};
use tracing::debug;
use url::Url;

use sift_core::config::RenderConfig;
use sift_core::{FetchOutcome, Renderer, SiftError};
use sift_guard::ensure_public_address;

/// Headless-Chrome renderer. The protocol client is synchronous, so each
/// render runs on the blocking pool under the configured hard cap.
pub struct HeadlessRenderer {
    config: RenderConfig,
    user_agent: String,
}

impl HeadlessRenderer {
    pub fn new(config: RenderConfig, user_agent: &str) -> Self {
        Self {
            config,
            user_agent: user_agent.to_string(),
        }
    }

    pub async fn render(&self, url: &Url) -> Result<FetchOutcome, SiftError> {
        let started = Instant::now();
        let cap = Duration::from_secs(self.config.hard_cap_seconds);
        let config = self.config.clone();
        let user_agent = self.user_agent.clone();
        let target = url.to_string();

        let handle = tokio::task::spawn_blocking(move || render_blocking(&target, &config, &user_agent));
        let rendered = tokio::time::timeout(cap, handle)
            .await
            .map_err(|_| SiftError::Render(format!("render exceeded {}s cap", self.config.hard_cap_seconds)))?
            .map_err(|e| SiftError::Render(format!("render task failed: {e}")))?
            .map_err(SiftError::Render)?;

        let final_url = Url::parse(&rendered.final_url).unwrap_or_else(|_| url.clone());
        // A page may navigate itself after load; the landing address gets
        // the same scrutiny as a redirect target.
        if final_url.host_str() != url.host_str() {
            ensure_public_address(&final_url).await?;
        }

        debug!(url = %url, final_url = %final_url, ms = started.elapsed().as_millis() as u64, "rendered");
        Ok(FetchOutcome {
            status: 200,
            final_url,
            headers: Default::default(),
            body: rendered.html.into_bytes(),
            renderer: Renderer::Headless,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

struct Rendered {
    html: String,
    final_url: String,
}

fn render_blocking(url: &str, config: &RenderConfig, user_agent: &str) -> Result<Rendered, String> {
    let mut builder = LaunchOptionsBuilder::default();
    builder
        .headless(true)
        .sandbox(false)
        .idle_browser_timeout(Duration::from_secs(config.hard_cap_seconds));
    if let Some(path) = &config.chrome_path {
        builder.path(Some(path.into()));
    }
    let options = builder.build().map_err(|e| format!("launch options: {e}"))?;

    let browser = Browser::new(options).map_err(|e| format!("browser launch: {e}"))?;
    let tab = browser.new_tab().map_err(|e| format!("new tab: {e}"))?;
    tab.set_user_agent(user_agent, None, None)
        .map_err(|e| format!("set user agent: {e}"))?;
    tab.set_default_timeout(Duration::from_secs(config.navigation_timeout_seconds));

    tab.navigate_to(url).map_err(|e| format!("navigate: {e}"))?;
    tab.wait_until_navigated().map_err(|e| format!("navigation wait: {e}"))?;

    // Give in-flight requests a window to settle before capturing the DOM.
    std::thread::sleep(Duration::from_millis(config.idle_wait_ms));

    let html = tab.get_content().map_err(|e| format!("capture DOM: {e}"))?;
    let final_url = tab.get_url();

    Ok(Rendered { html, final_url })
}
