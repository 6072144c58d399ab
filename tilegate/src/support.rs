//! Embedded browser support files and template expansion.
//!
//! A handful of small static files ship inside the binary so a dataset
//! can be inspected from a plain browser without any external assets.
//! Files flagged as templates are expanded with the serving location's
//! variable set before delivery.

use std::collections::HashMap;

/// Template variables available to support-file expansion.
///
/// Placeholders use the `{{name}}` form; unknown placeholders are left
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Expand `{{name}}` placeholders in `template`.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let name = &after[..end];
                    match self.values.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            // unknown placeholder stays as-is
                            out.push_str("{{");
                            out.push_str(name);
                            out.push_str("}}");
                        }
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str("{{");
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// One embedded support file.
#[derive(Debug, Clone, Copy)]
pub struct SupportFile {
    pub path: &'static str,
    pub data: &'static [u8],
    pub content_type: &'static str,
    pub is_template: bool,
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{title}}</title>
<link rel="stylesheet" href="browser.css">
</head>
<body>
<h1>{{title}}</h1>
<p>Dataset browser, tilegate {{version}}.</p>
<p>Entry points: <a href="tileset.json">tileset.json</a>,
<a href="mapconfig.json">mapconfig.json</a></p>
</body>
</html>
"#;

const BROWSER_CSS: &str = "body { font-family: sans-serif; margin: 2em; }\n\
h1 { font-size: 1.2em; }\n";

const FILES: [SupportFile; 2] = [
    SupportFile {
        path: "index.html",
        data: INDEX_HTML.as_bytes(),
        content_type: "text/html; charset=utf-8",
        is_template: true,
    },
    SupportFile {
        path: "browser.css",
        data: BROWSER_CSS.as_bytes(),
        content_type: "text/css",
        is_template: false,
    },
];

/// Look up an embedded support file. Empty paths and `.` resolve to the
/// index page.
pub fn find(path: &str) -> Option<&'static SupportFile> {
    let path = match path {
        "" | "." => "index.html",
        other => other,
    };
    FILES.iter().find(|file| file.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_known_variables() {
        let vars = Variables::new()
            .with_var("title", "World")
            .with_var("version", "1.0");

        assert_eq!(vars.expand("hello {{title}} v{{version}}"), "hello World v1.0");
    }

    #[test]
    fn test_expand_unknown_placeholder_kept() {
        let vars = Variables::new();
        assert_eq!(vars.expand("x {{missing}} y"), "x {{missing}} y");
    }

    #[test]
    fn test_expand_unterminated() {
        let vars = Variables::new().with_var("a", "1");
        assert_eq!(vars.expand("x {{a"), "x {{a");
    }

    #[test]
    fn test_find_index_aliases() {
        assert!(find("").is_some());
        assert!(find(".").is_some());
        assert_eq!(find("").unwrap().path, "index.html");
    }

    #[test]
    fn test_find_missing() {
        assert!(find("nonexistent.js").is_none());
    }

    #[test]
    fn test_index_is_template() {
        let index = find("index.html").unwrap();
        assert!(index.is_template);
        assert!(!find("browser.css").unwrap().is_template);
    }
}
