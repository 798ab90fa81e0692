use std::ffi::OsStr;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions};
use reqwest::redirect;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

/// Source of fully rendered listing-page HTML.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|source| FetchError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

/// Renders pages in a headless Chrome session, one session per URL.
pub struct ChromeFetcher {
    user_agent: String,
    accept_language: String,
    render_wait: Duration,
    headless: bool,
}

impl ChromeFetcher {
    pub fn new(user_agent: &str, accept_language: &str, render_wait: Duration, headless: bool) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            accept_language: accept_language.to_string(),
            render_wait,
            headless,
        }
    }

    fn render(&self, url: &Url) -> anyhow::Result<String> {
        let lang_arg = format!("--lang={}", self.accept_language);
        let browser = Browser::new(LaunchOptions {
            headless: self.headless,
            window_size: Some((1920, 1080)),
            args: vec![OsStr::new(&lang_arg)],
            ..Default::default()
        })?;

        let tab = browser.new_tab()?;
        tab.set_user_agent(&self.user_agent, Some(&self.accept_language), None)?;
        tab.navigate_to(url.as_str())?.wait_until_navigated()?;

        // Cards are filled in by client-side scripts after load.
        std::thread::sleep(self.render_wait);

        let html = tab.get_content()?;
        debug!(url = %url, bytes = html.len(), "page rendered");
        // Dropping `browser` shuts the Chrome process down on every path.
        Ok(html)
    }
}

impl PageFetcher for ChromeFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = parse_url(url)?;
        self.render(&parsed).map_err(|e| FetchError::Browser {
            url: url.to_string(),
            message: format!("{e:#}"),
        })
    }
}

/// Plain GET without script execution.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, accept_language: &str) -> Result<Self, reqwest::Error> {
        let custom_redirect_policy = redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > 10 {
                attempt.error("Too many redirects (>10)")
            } else {
                attempt.follow()
            }
        });

        let mut headers = reqwest::header::HeaderMap::new();
        if let Ok(lang) = reqwest::header::HeaderValue::from_str(accept_language) {
            headers.insert(reqwest::header::ACCEPT_LANGUAGE, lang);
        }

        let client = reqwest::blocking::Client::builder()
            .redirect(custom_redirect_policy)
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = parse_url(url)?;
        let http_err = |source: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            source,
        };

        let resp = self.client.get(parsed).send().map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().map_err(http_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_url_is_rejected_before_any_request() {
        let fetcher = HttpFetcher::new("test-agent", "ru").unwrap();
        let err = fetcher.fetch("not a url").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }), "{err}");

        let chrome = ChromeFetcher::new("test-agent", "ru", Duration::ZERO, true);
        let err = chrome.fetch("wildberries.ru/brands/x").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }), "{err}");
    }
}
