use super::MailchimpService;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory Mailchimp account. Counts every call, including failed ones.
#[derive(Clone)]
pub struct MockMailchimpClient {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    templates: Arc<Mutex<Vec<(String, String)>>>,
    base_url: String,
    upload_count: Arc<Mutex<usize>>,
    template_count: Arc<Mutex<usize>>,
    /// Remaining scripted failures per file or template name.
    failures: Arc<Mutex<HashMap<String, usize>>>,
    latency: Option<Duration>,
    in_flight: Arc<Mutex<usize>>,
    peak_in_flight: Arc<Mutex<usize>>,
}

impl MockMailchimpClient {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            templates: Arc::new(Mutex::new(Vec::new())),
            base_url: "https://mcusercontent.com/mock".to_string(),
            upload_count: Arc::new(Mutex::new(0)),
            template_count: Arc::new(Mutex::new(0)),
            failures: Arc::new(Mutex::new(HashMap::new())),
            latency: None,
            in_flight: Arc::new(Mutex::new(0)),
            peak_in_flight: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// The first `times` calls for `name` fail with a retryable error.
    pub fn with_failures(self, name: &str, times: usize) -> Self {
        self.failures.lock().unwrap().insert(name.to_string(), times);
        self
    }

    /// Every call for `name` fails.
    pub fn with_permanent_failure(self, name: &str) -> Self {
        self.with_failures(name, usize::MAX)
    }

    /// Each call sleeps before answering, so concurrent calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    pub fn get_template_count(&self) -> usize {
        *self.template_count.lock().unwrap()
    }

    /// Highest number of calls that were in progress at the same time.
    pub fn get_peak_in_flight(&self) -> usize {
        *self.peak_in_flight.lock().unwrap()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }

    pub fn get_templates(&self) -> Vec<(String, String)> {
        self.templates.lock().unwrap().clone()
    }

    async fn simulate_call(&self, name: &str) -> Result<()> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            *in_flight += 1;
            let mut peak = self.peak_in_flight.lock().unwrap();
            *peak = (*peak).max(*in_flight);
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        *self.in_flight.lock().unwrap() -= 1;

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                Err(Error::Upload(format!(
                    "Mailchimp API error (503): scripted failure for {}",
                    name
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MockMailchimpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailchimpService for MockMailchimpClient {
    async fn upload_image(&self, name: &str, data: &[u8]) -> Result<String> {
        *self.upload_count.lock().unwrap() += 1;
        self.simulate_call(name).await?;

        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(format!("{}/{}", self.base_url, name))
    }

    async fn upload_template(&self, name: &str, html: &str) -> Result<String> {
        *self.template_count.lock().unwrap() += 1;
        self.simulate_call(name).await?;

        let mut templates = self.templates.lock().unwrap();
        templates.push((name.to_string(), html.to_string()));
        Ok((10_000 + templates.len()).to_string())
    }
}
