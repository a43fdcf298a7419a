use reqwest::Client;
use std::time::Duration;

use crate::models::derivative::DerivativeRecord;

/// Posts each successful derivative record to an external URL.
pub struct CallbackNotifier {
    http: Client,
    url: String,
}

impl CallbackNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn notify(&self, record: &DerivativeRecord) -> Result<(), reqwest::Error> {
        self.http
            .post(&self.url)
            .json(record)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
