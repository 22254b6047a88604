//! In-memory page for tests and dry runs.
//!
//! Provides a small scripted DOM:
//! - elements addressed by visible text, selector, label, or placeholder
//! - computed styles per element
//! - click and fill effects (navigation, network responses, revealing elements)
//! - navigation failures on demand

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::oneshot;

use super::{NetworkExpectation, Page, PageError, PageResult, ResponseWait, StyleProperty};

/// Something that happens when an element is clicked or filled
#[derive(Debug, Clone)]
pub enum MockEffect {
    /// Change the current URL
    Navigate(String),
    /// Emit a network response
    Respond {
        method: String,
        url: String,
        status: u16,
    },
    /// Make the element with this text visible
    Reveal(String),
}

/// A scripted element
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    /// Visible text
    pub text: String,
    /// CSS selector that addresses this element
    pub selector: Option<String>,
    /// Accessible label (inputs)
    pub label: Option<String>,
    /// Placeholder text (inputs)
    pub placeholder: Option<String>,
    /// Whether the element is rendered visibly
    pub visible: bool,
    /// Computed styles keyed by CSS property name
    pub styles: HashMap<String, String>,
    /// Current input value
    pub value: String,
    /// Effects applied on click, in order
    pub on_click: Vec<MockEffect>,
    /// Effects applied when the input is filled, in order
    pub on_fill: Vec<MockEffect>,
}

impl MockElement {
    /// A visible element showing `text`
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            visible: true,
            ..Default::default()
        }
    }

    /// A visible input with an accessible label
    pub fn labeled_input(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            visible: true,
            ..Default::default()
        }
    }

    /// A visible input with placeholder text
    pub fn placeholder_input(placeholder: impl Into<String>) -> Self {
        Self {
            placeholder: Some(placeholder.into()),
            visible: true,
            ..Default::default()
        }
    }

    /// Address this element by selector
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    /// Set a computed style
    pub fn style(mut self, property: StyleProperty, value: impl Into<String>) -> Self {
        self.styles.insert(property.css_name().to_string(), value.into());
        self
    }

    /// Start hidden
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Add a click effect
    pub fn on_click(mut self, effect: MockEffect) -> Self {
        self.on_click.push(effect);
        self
    }

    /// Add a fill effect
    pub fn on_fill(mut self, effect: MockEffect) -> Self {
        self.on_fill.push(effect);
        self
    }
}

/// In-memory [`Page`] implementation
#[derive(Debug, Default)]
pub struct MockPage {
    elements: Vec<MockElement>,
    current_url: String,
    unreachable: HashSet<String>,
    failing_navigations: usize,
    listeners: Vec<(NetworkExpectation, oneshot::Sender<()>)>,
    history: Vec<String>,
}

impl MockPage {
    /// Create an empty page at `about:blank`
    pub fn new() -> Self {
        Self {
            current_url: "about:blank".to_string(),
            ..Default::default()
        }
    }

    /// Add an element
    pub fn with_element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Make navigation to this exact URL fail
    pub fn unreachable(mut self, url: impl Into<String>) -> Self {
        self.unreachable.insert(url.into());
        self
    }

    /// Make the next `count` navigations fail regardless of URL
    pub fn failing_navigations(mut self, count: usize) -> Self {
        self.failing_navigations = count;
        self
    }

    /// Current URL
    pub fn url(&self) -> &str {
        &self.current_url
    }

    /// Operations performed so far, e.g. `goto http://...`, `click Save`
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Current value of the input with this label or placeholder
    pub fn input_value(&self, label_or_placeholder: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| {
                e.label.as_deref() == Some(label_or_placeholder)
                    || e.placeholder.as_deref() == Some(label_or_placeholder)
            })
            .map(|e| e.value.as_str())
    }

    /// Emit a network response as if the application made a request
    pub fn emit_response(&mut self, method: &str, url: &str, status: u16) {
        self.history.push(format!("response {} {} {}", method, url, status));
        let listeners = std::mem::take(&mut self.listeners);
        for (expectation, tx) in listeners {
            if expectation.matches(method, url, status) {
                let _ = tx.send(());
            } else {
                self.listeners.push((expectation, tx));
            }
        }
    }

    fn find_text(&self, text: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.text.contains(text))
    }

    fn find_visible_text(&self, text: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|e| e.visible && e.text.contains(text))
    }

    fn find_selector(&self, selector: &str) -> Option<usize> {
        self.elements
            .iter()
            .position(|e| e.selector.as_deref() == Some(selector))
    }

    fn fill(&mut self, index: usize, value: &str) {
        self.elements[index].value = value.to_string();
        let effects = self.elements[index].on_fill.clone();
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: MockEffect) {
        match effect {
            MockEffect::Navigate(url) => self.current_url = url,
            MockEffect::Respond { method, url, status } => self.emit_response(&method, &url, status),
            MockEffect::Reveal(text) => {
                for element in self.elements.iter_mut().filter(|e| e.text.contains(&text)) {
                    element.visible = true;
                }
            }
        }
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> PageResult<()> {
        self.history.push(format!("goto {}", url));
        if self.failing_navigations > 0 {
            self.failing_navigations -= 1;
            return Err(PageError::Navigation(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }
        if self.unreachable.contains(url) {
            return Err(PageError::Navigation(format!("net::ERR_CONNECTION_REFUSED at {}", url)));
        }
        self.current_url = url.to_string();
        Ok(())
    }

    async fn is_text_visible(&mut self, text: &str) -> PageResult<bool> {
        Ok(self
            .find_text(text)
            .map(|i| self.elements[i].visible)
            .unwrap_or(false))
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> PageResult<()> {
        match self.find_selector(selector) {
            Some(i) if self.elements[i].visible => Ok(()),
            _ => Err(PageError::Timeout(format!(
                "waiting for selector \"{}\" to be visible",
                selector
            ))),
        }
    }

    async fn selector_text(&mut self, selector: &str, _timeout: Duration) -> PageResult<String> {
        self.find_selector(selector)
            .map(|i| self.elements[i].text.clone())
            .ok_or_else(|| PageError::Timeout(format!("waiting for selector \"{}\"", selector)))
    }

    async fn click_text(&mut self, text: &str, _timeout: Duration) -> PageResult<()> {
        self.history.push(format!("click {}", text));
        let index = self.find_visible_text(text).ok_or_else(|| {
            PageError::Timeout(format!("waiting for text=\"{}\" to be clickable", text))
        })?;
        let effects = self.elements[index].on_click.clone();
        for effect in effects {
            self.apply(effect);
        }
        Ok(())
    }

    async fn count_by_label(&mut self, label: &str) -> PageResult<usize> {
        Ok(self
            .elements
            .iter()
            .filter(|e| e.label.as_deref() == Some(label))
            .count())
    }

    async fn fill_by_label(&mut self, label: &str, value: &str) -> PageResult<()> {
        self.history.push(format!("fill label {} = {}", label, value));
        let index = self
            .elements
            .iter()
            .position(|e| e.label.as_deref() == Some(label))
            .ok_or_else(|| PageError::NotFound(format!("No input labelled \"{}\"", label)))?;
        self.fill(index, value);
        Ok(())
    }

    async fn count_by_placeholder(&mut self, placeholder: &str) -> PageResult<usize> {
        Ok(self
            .elements
            .iter()
            .filter(|e| e.placeholder.as_deref() == Some(placeholder))
            .count())
    }

    async fn fill_by_placeholder(&mut self, placeholder: &str, value: &str) -> PageResult<()> {
        self.history
            .push(format!("fill placeholder {} = {}", placeholder, value));
        let index = self
            .elements
            .iter()
            .position(|e| e.placeholder.as_deref() == Some(placeholder))
            .ok_or_else(|| {
                PageError::NotFound(format!("No input with placeholder \"{}\"", placeholder))
            })?;
        self.fill(index, value);
        Ok(())
    }

    async fn fill_selector(&mut self, selector: &str, value: &str) -> PageResult<()> {
        self.history.push(format!("fill {} = {}", selector, value));
        let index = self
            .find_selector(selector)
            .ok_or_else(|| PageError::Timeout(format!("waiting for selector \"{}\"", selector)))?;
        self.fill(index, value);
        Ok(())
    }

    async fn wait_for_url(&mut self, fragment: &str, _timeout: Duration) -> PageResult<()> {
        if self.current_url.contains(fragment) {
            Ok(())
        } else {
            Err(PageError::Timeout(format!(
                "waiting for URL containing \"{}\" (at {})",
                fragment, self.current_url
            )))
        }
    }

    async fn computed_style(&mut self, text: &str, property: StyleProperty) -> PageResult<String> {
        let index = self
            .find_text(text)
            .ok_or_else(|| PageError::NotFound(format!("No element with text \"{}\"", text)))?;
        Ok(self.elements[index]
            .styles
            .get(property.css_name())
            .cloned()
            .unwrap_or_else(|| "rgb(0, 0, 0)".to_string()))
    }

    async fn expect_response(
        &mut self,
        expectation: NetworkExpectation,
        timeout: Duration,
    ) -> PageResult<ResponseWait> {
        self.history.push(format!("listen {}", expectation));
        let (tx, rx) = oneshot::channel();
        let label = expectation.to_string();
        self.listeners.push((expectation, tx));
        Ok(Box::pin(async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(PageError::Backend(format!("listener for {} was dropped", label))),
                Err(_) => Err(PageError::Timeout(format!("waiting for response {}", label))),
            }
        }))
    }

    async fn wait(&mut self, ms: u64) -> PageResult<()> {
        self.history.push(format!("wait {}", ms));
        Ok(())
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn click_effects_resolve_listeners() {
        let mut page = MockPage::new().with_element(MockElement::text("Save").on_click(
            MockEffect::Respond {
                method: "POST".into(),
                url: "http://localhost:3000/api/save".into(),
                status: 200,
            },
        ));

        let wait = page
            .expect_response(NetworkExpectation::new("POST", "/api/save"), Duration::from_millis(200))
            .await
            .unwrap();
        page.click_text("Save", Duration::from_millis(10)).await.unwrap();
        assert!(wait.await.is_ok());
    }

    #[tokio::test]
    async fn unmatched_listener_times_out() {
        let mut page = MockPage::new();
        let wait = page
            .expect_response(NetworkExpectation::new("GET", "/api/none"), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(matches!(wait.await, Err(PageError::Timeout(_))));
    }

    #[tokio::test]
    async fn failing_navigations_are_consumed() {
        let mut page = MockPage::new().failing_navigations(1);
        assert!(page.goto("http://a", Duration::from_millis(1)).await.is_err());
        assert!(page.goto("http://a", Duration::from_millis(1)).await.is_ok());
        assert_eq!(page.url(), "http://a");
    }

    #[tokio::test]
    async fn hidden_elements_become_visible_on_reveal() {
        let mut page = MockPage::new()
            .with_element(MockElement::text("Open").on_click(MockEffect::Reveal("Dialog".into())))
            .with_element(MockElement::text("Dialog").hidden());
        assert!(!page.is_text_visible("Dialog").await.unwrap());
        page.click_text("Open", Duration::from_millis(1)).await.unwrap();
        assert!(page.is_text_visible("Dialog").await.unwrap());
    }
}
