//! Navigation context.
//!
//! The flows never touch a global "window". Whatever hosts them supplies a
//! [`Navigator`]: the page URL, full-page navigation, reload and native form
//! submission. [`RecordingNavigator`] records what a browser would have done;
//! [`HeadlessNavigator`] actually performs it over HTTP.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use url::Url;

use crate::client::transport::ReqwestTransport;
use crate::error::{BridgeError, BridgeResult};

/// A browser-native form POST with hidden inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub action: Url,
    pub fields: Vec<(String, String)>,
}

impl FormSubmission {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait Navigator: Send + Sync {
    /// URL of the page the flow runs in.
    fn current_url(&self) -> Url;

    /// Full-page navigation to `url`, relative to the current page.
    async fn navigate(&self, url: &str) -> BridgeResult<()>;

    /// Reload the current page.
    async fn reload(&self) -> BridgeResult<()>;

    /// Submit `form` as a real navigation. Resolves once dispatched.
    async fn submit_form(&self, form: FormSubmission) -> BridgeResult<()>;
}

#[async_trait]
impl<N: Navigator + ?Sized> Navigator for Arc<N> {
    fn current_url(&self) -> Url {
        (**self).current_url()
    }

    async fn navigate(&self, url: &str) -> BridgeResult<()> {
        (**self).navigate(url).await
    }

    async fn reload(&self) -> BridgeResult<()> {
        (**self).reload().await
    }

    async fn submit_form(&self, form: FormSubmission) -> BridgeResult<()> {
        (**self).submit_form(form).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    Navigate(String),
    Reload,
    SubmitForm(FormSubmission),
}

/// Navigator that only records events, for deterministic tests of navigation
/// decisions.
#[derive(Debug)]
pub struct RecordingNavigator {
    current: Mutex<Url>,
    events: Mutex<Vec<NavigationEvent>>,
}

impl RecordingNavigator {
    pub fn new(current: Url) -> Self {
        Self {
            current: Mutex::new(current),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn parse(current: &str) -> BridgeResult<Self> {
        Ok(Self::new(Url::parse(current)?))
    }

    pub fn events(&self) -> Vec<NavigationEvent> {
        lock(&self.events).clone()
    }

    /// Targets passed to `navigate`, in order.
    pub fn navigations(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                NavigationEvent::Navigate(url) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reload_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, NavigationEvent::Reload))
            .count()
    }

    pub fn submitted_forms(&self) -> Vec<FormSubmission> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                NavigationEvent::SubmitForm(form) => Some(form.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Navigator for RecordingNavigator {
    fn current_url(&self) -> Url {
        lock(&self.current).clone()
    }

    async fn navigate(&self, url: &str) -> BridgeResult<()> {
        {
            let mut current = lock(&self.current);
            let next = current.join(url)?;
            *current = next;
        }
        lock(&self.events).push(NavigationEvent::Navigate(url.to_string()));
        Ok(())
    }

    async fn reload(&self) -> BridgeResult<()> {
        lock(&self.events).push(NavigationEvent::Reload);
        Ok(())
    }

    async fn submit_form(&self, form: FormSubmission) -> BridgeResult<()> {
        lock(&self.events).push(NavigationEvent::SubmitForm(form));
        Ok(())
    }
}

/// Navigator that performs navigations with a reqwest client, following
/// redirects like a browser would. Share the client with a
/// [`ReqwestTransport`] so both see the same cookies.
pub struct HeadlessNavigator {
    client: reqwest::Client,
    current: Mutex<Url>,
    last_status: Mutex<Option<u16>>,
}

impl HeadlessNavigator {
    pub fn new(client: reqwest::Client, start: Url) -> Self {
        Self {
            client,
            current: Mutex::new(start),
            last_status: Mutex::new(None),
        }
    }

    /// Navigator sharing the transport's cookie jar.
    pub fn for_transport(transport: &ReqwestTransport, start: Url) -> Self {
        Self::new(transport.client().clone(), start)
    }

    /// Status of the last page load, if any.
    pub fn last_status(&self) -> Option<u16> {
        *lock(&self.last_status)
    }

    fn land(&self, response: &reqwest::Response) {
        let status = response.status();
        if !status.is_success() {
            warn!("Page load ended with status {}", status);
        }
        *lock(&self.current) = response.url().clone();
        *lock(&self.last_status) = Some(status.as_u16());
        debug!("Landed on {}", response.url().path());
    }

    async fn load(&self, url: Url) -> BridgeResult<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BridgeError::Navigation(e.to_string()))?;
        self.land(&response);
        Ok(())
    }
}

#[async_trait]
impl Navigator for HeadlessNavigator {
    fn current_url(&self) -> Url {
        lock(&self.current).clone()
    }

    async fn navigate(&self, url: &str) -> BridgeResult<()> {
        let target = self.current_url().join(url)?;
        self.load(target).await
    }

    async fn reload(&self) -> BridgeResult<()> {
        let current = self.current_url();
        self.load(current).await
    }

    async fn submit_form(&self, form: FormSubmission) -> BridgeResult<()> {
        let response = self
            .client
            .post(form.action)
            .form(&form.fields)
            .send()
            .await
            .map_err(|e| BridgeError::Navigation(e.to_string()))?;
        self.land(&response);
        Ok(())
    }
}
