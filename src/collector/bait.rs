//! Bait content served to every unauthenticated visitor

use axum::{
    body::Bytes,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use std::collections::HashMap;
use std::path::Path;

use crate::config::{Config, ConfigError};

const DEFAULT_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Sign in</title>
<link rel="stylesheet" href="/static/css/main.css">
</head>
<body>
<main class="login">
  <h1>Sign in to continue</h1>
  <form method="post" action="/login" autocomplete="off">
    <input type="text" name="username" placeholder="Username">
    <input type="password" name="password" placeholder="Password">
    <button type="submit">Sign in</button>
  </form>
</main>
<script src="{{probe_path}}" defer></script>
</body>
</html>
"#;

const DEFAULT_PROBE: &str = r#"(function () {
  var id = "{{id}}";
  if (!id) { return; }
  var n = window.navigator || {};
  var data = {
    userAgent: n.userAgent,
    language: n.language,
    languages: n.languages,
    platform: n.platform,
    hardwareConcurrency: n.hardwareConcurrency,
    deviceMemory: n.deviceMemory,
    cookieEnabled: n.cookieEnabled,
    doNotTrack: n.doNotTrack,
    webdriver: n.webdriver,
    timezone: (Intl.DateTimeFormat().resolvedOptions() || {}).timeZone,
    screen: [screen.width, screen.height, screen.colorDepth].join("x"),
    viewport: [window.innerWidth, window.innerHeight].join("x"),
    referrer: document.referrer,
    location: String(window.location)
  };
  try {
    fetch("{{deep_path}}", {
      method: "POST",
      headers: { "Content-Type": "application/json" },
      body: JSON.stringify({ id: id, data: data })
    });
  } catch (e) {}
})();
"#;

/// 1x1 transparent PNG
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

/// Content types for the extensions we answer with a lookalike asset
fn content_type_for(extension: &str) -> Option<&'static str> {
    let content_type = match extension {
        "js" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        _ => return None,
    };
    Some(content_type)
}

fn default_asset(extension: &str) -> Option<Bytes> {
    let body: &'static [u8] = match extension {
        "js" => b"!function(){\"use strict\"}();\n",
        "css" => b"body{margin:0;font-family:sans-serif}.login{max-width:360px;margin:10vh auto}\n",
        "json" => b"{}",
        "txt" => b"User-agent: *\nDisallow:\n",
        "xml" => b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\"></urlset>\n",
        "png" | "ico" => PIXEL_PNG,
        "svg" => b"<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1\" height=\"1\"/>",
        _ => return None,
    };
    Some(Bytes::from_static(body))
}

/// A rendered bait response
#[derive(Debug, Clone)]
pub struct Bait {
    content_type: &'static str,
    body: Bytes,
    cookie: Option<String>,
}

impl Bait {
    #[cfg(test)]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Hand the correlation id to the visitor as a cookie
    pub fn with_correlation(mut self, cookie_name: &str, id: Option<&str>) -> Self {
        self.cookie = id.map(|id| {
            Cookie::build((cookie_name.to_string(), id.to_string()))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .build()
                .to_string()
        });
        self
    }
}

impl IntoResponse for Bait {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.content_type)],
            self.body,
        )
            .into_response();

        if let Some(cookie) = self.cookie {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

/// Page template, probe script and lookalike assets, loaded once at boot
#[derive(Debug, Clone)]
pub struct BaitCatalog {
    page: Bytes,
    probe_template: String,
    assets: HashMap<String, Bytes>,
}

impl BaitCatalog {
    pub fn load(config: &Config) -> Result<Self, ConfigError> {
        let template = match &config.bait_template {
            Some(path) => read_to_string(path)?,
            None => DEFAULT_PAGE.to_string(),
        };

        let mut assets = HashMap::new();
        if let Some(dir) = &config.bait_assets_dir {
            let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Read {
                path: dir.clone(),
                source: e,
            })?;
            for entry in entries.flatten() {
                let path = entry.path();
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                let Some(extension) = name.strip_prefix("bait.") else {
                    continue;
                };
                if content_type_for(extension).is_none() {
                    tracing::warn!("Ignoring bait asset with unsupported extension: {}", path.display());
                    continue;
                }
                let body = std::fs::read(&path).map_err(|e| ConfigError::Read {
                    path: path.clone(),
                    source: e,
                })?;
                assets.insert(extension.to_string(), Bytes::from(body));
            }
            tracing::info!("Loaded {} bait assets from {}", assets.len(), dir.display());
        }

        Ok(Self {
            page: Bytes::from(template.replace("{{probe_path}}", &config.probe_script_path)),
            probe_template: DEFAULT_PROBE.replace("{{deep_path}}", &config.deep_collector_path),
            assets,
        })
    }

    /// The universal bait page
    pub fn page(&self) -> Bait {
        Bait {
            content_type: "text/html; charset=utf-8",
            body: self.page.clone(),
            cookie: None,
        }
    }

    /// The probe script, armed with `id` when the visitor is known
    pub fn probe(&self, id: Option<&str>) -> Bait {
        let script = self.probe_template.replace("{{id}}", id.unwrap_or(""));
        Bait {
            content_type: "application/javascript; charset=utf-8",
            body: Bytes::from(script),
            cookie: None,
        }
    }

    /// A lookalike asset for `extension`, if we serve that kind
    pub fn asset(&self, extension: &str) -> Option<Bait> {
        let extension = extension.to_ascii_lowercase();
        let content_type = content_type_for(&extension)?;
        let body = match self.assets.get(&extension) {
            Some(body) => body.clone(),
            None => default_asset(&extension)?,
        };
        Some(Bait {
            content_type,
            body,
            cookie: None,
        })
    }
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })
}
