use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::session::CdpSession;
use crate::config::SelectorConfig;
use crate::error::{CartwatchError, Result};
use crate::watcher::{CatalogPage, ProductEntry};

/// How long a reload may take before the tick gives up on it.
const RELOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Selector set as handed to the page scripts.
#[derive(Serialize)]
struct PageSelectors<'a> {
    container: &'a str,
    name: &'a str,
    action: &'a str,
}

/// The catalog tab, read and driven over CDP.
pub struct CdpCatalogPage {
    session: CdpSession,
    selectors: SelectorConfig,
}

impl CdpCatalogPage {
    pub fn new(session: CdpSession, selectors: SelectorConfig) -> Self {
        Self { session, selectors }
    }

    fn selectors_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&PageSelectors {
            container: &self.selectors.container,
            name: &self.selectors.name,
            action: &self.selectors.action,
        })?)
    }

    fn list_entries_js(&self) -> Result<String> {
        Ok(format!(
            r#"(function(sel) {{
    return Array.from(document.querySelectorAll(sel.container)).map(function(product, index) {{
        var nameEl = product.querySelector(sel.name);
        var button = product.querySelector(sel.action);
        return {{
            index: index,
            name: nameEl ? nameEl.textContent : null,
            actionClasses: button ? Array.from(button.classList) : null
        }};
    }});
}})({})"#,
            self.selectors_json()?
        ))
    }

    /// Locate the entry's button, scroll it into view and return its centre.
    /// Returns null if the entry moved or lost its button since the scan.
    fn locate_action_js(&self, entry: &ProductEntry) -> Result<String> {
        Ok(format!(
            r#"(function(sel, index, expectedName) {{
    var product = document.querySelectorAll(sel.container)[index];
    if (!product) return null;
    var nameEl = product.querySelector(sel.name);
    if (expectedName !== null && (!nameEl || nameEl.textContent !== expectedName)) return null;
    var button = product.querySelector(sel.action);
    if (!button) return null;
    button.scrollIntoView({{ behavior: 'instant', block: 'center', inline: 'center' }});
    var rect = button.getBoundingClientRect();
    return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }};
}})({}, {}, {})"#,
            self.selectors_json()?,
            entry.index,
            serde_json::to_string(&entry.name)?
        ))
    }
}

#[async_trait]
impl CatalogPage for CdpCatalogPage {
    async fn list_entries(&self) -> Result<Vec<ProductEntry>> {
        let value = self.session.eval(&self.list_entries_js()?).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn trigger(&self, entry: &ProductEntry) -> Result<()> {
        let coords = self.session.eval(&self.locate_action_js(entry)?).await?;

        if coords.is_null() {
            return Err(CartwatchError::ElementNotFound(format!(
                "{} in product #{}",
                self.selectors.action, entry.index
            )));
        }

        let x = coords
            .get("x")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CartwatchError::Other("Invalid coordinates".to_string()))?;
        let y = coords
            .get("y")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| CartwatchError::Other("Invalid coordinates".to_string()))?;

        self.session.click_at(x, y).await
    }

    async fn reload(&self) -> Result<()> {
        self.session.reload_and_wait(RELOAD_TIMEOUT).await
    }
}
