//! Swagger UI page.
//!
//! A single static HTML page that pulls Swagger UI from a CDN and points it
//! at the description file the host serves. The page never changes while the
//! host runs, so it is rendered once and handed out as [`Bytes`].
//!
//! ```
//! use twinport_docs::SwaggerUi;
//!
//! let swagger = SwaggerUi::new("/docs/", "/photos.spec.json");
//! assert!(swagger.render().contains("url: \"/photos.spec.json\""));
//! ```

use bytes::Bytes;

/// Route the Swagger UI is mounted on by default.
pub const DEFAULT_UI_PATH: &str = "/docs/";

const SWAGGER_UI_DIST: &str = "https://unpkg.com/swagger-ui-dist@5.18.2";

const PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>@TITLE@</title>
<link rel="stylesheet" href="@DIST@/swagger-ui.css">
<style>body { margin: 0; }</style>
</head>
<body>
<div id="swagger-ui"></div>
<script src="@DIST@/swagger-ui-bundle.js"></script>
<script>
window.onload = () => {
  window.ui = SwaggerUIBundle({
    url: @URL@,
    dom_id: "#swagger-ui",
    deepLinking: true,
    presets: [SwaggerUIBundle.presets.apis],
  });
};
</script>
</body>
</html>
"##;

/// The interactive viewer for one API description file.
#[derive(Debug, Clone)]
pub struct SwaggerUi {
    path: String,
    spec_url: String,
    title: String,
}

impl SwaggerUi {
    /// A page mounted at `path` that loads the description at `spec_url`.
    #[must_use]
    pub fn new(path: impl Into<String>, spec_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            spec_url: spec_url.into(),
            title: "API documentation".to_string(),
        }
    }

    /// Replaces the browser tab title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Mount path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// URL of the description file.
    #[must_use]
    pub fn spec_url(&self) -> &str {
        &self.spec_url
    }

    /// Renders the page.
    ///
    /// The title is HTML-escaped. The description URL becomes a JSON string
    /// literal with `</` broken up so it cannot end the script block.
    #[must_use]
    pub fn render(&self) -> String {
        let url = serde_json::Value::from(self.spec_url.as_str())
            .to_string()
            .replace("</", "<\\/");

        PAGE.replace("@DIST@", SWAGGER_UI_DIST)
            .replace("@TITLE@", &escape_text(&self.title))
            .replace("@URL@", &url)
    }

    /// [`render`](Self::render) as a response body.
    #[must_use]
    pub fn page(&self) -> Bytes {
        Bytes::from(self.render())
    }
}

fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
