use chrono::{Datelike, NaiveDate};
use log::{debug, info};
use minijinja::{Environment, context};

use crate::cache::CacheNamespace;
use crate::error::{Result, TileError};

/// A style template rendered for one date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyleDocument(String);

impl StyleDocument {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Cache key of the style document for `date`.
pub fn style_cache_key(date: NaiveDate) -> String {
    format!("{}-style.xml", date.format("%Y-%m-%d"))
}

/// Renders Jinja style templates with the request date substituted in.
///
/// Cached documents are keyed by date only, so a resolver with a cache
/// must be used with a single template.
pub struct StyleResolver {
    env: Environment<'static>,
    cache: Option<CacheNamespace>,
}

impl StyleResolver {
    pub fn new(cache: CacheNamespace) -> Self {
        Self {
            env: Environment::new(),
            cache: Some(cache),
        }
    }

    pub fn uncached() -> Self {
        Self {
            env: Environment::new(),
            cache: None,
        }
    }

    /// Render `template` for `date` without touching the cache.
    ///
    /// The template sees `date` as `YYYY-MM-DD` plus `year`, `month` and `day`.
    pub fn render(&self, date: NaiveDate, template: &str) -> Result<StyleDocument> {
        let rendered = self.env.render_str(
            template,
            context! {
                date => date.format("%Y-%m-%d").to_string(),
                year => date.year(),
                month => date.month(),
                day => date.day(),
            },
        )?;
        Ok(StyleDocument(rendered))
    }

    pub fn resolve(
        &self,
        date: NaiveDate,
        template: &str,
        use_cache: bool,
    ) -> Result<StyleDocument> {
        let cache = match (&self.cache, use_cache) {
            (Some(cache), true) => cache,
            _ => return self.render(date, template),
        };

        let key = style_cache_key(date);
        let mut computed = false;
        let bytes = cache.get_or_set(&key, &mut || {
            computed = true;
            info!("Rendering style document for {}", date);
            Ok(self.render(date, template)?.into_string().into_bytes())
        })?;
        if !computed {
            debug!("Style cache hit for {}", key);
        }

        String::from_utf8(bytes).map(StyleDocument).map_err(|e| {
            TileError::Cache(format!("cached style {} is not valid UTF-8: {}", key, e))
        })
    }
}
