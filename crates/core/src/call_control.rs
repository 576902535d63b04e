//! Telephony Control Plane
//!
//! Actions on a live call that go through the telephony provider's REST API
//! rather than the media stream: redirecting the call elsewhere and fetching
//! call metadata such as the caller's number.

use crate::error::ProviderError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";
const CALL_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Operations on an in-progress call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Redirects the call to `destination`, ending the media stream.
    async fn transfer(&self, call_id: &str, destination: &str) -> Result<(), ProviderError>;

    /// Returns the phone number the call originated from.
    async fn lookup_caller_number(&self, call_id: &str) -> Result<String, ProviderError>;
}

/// `CallControl` backed by the Twilio REST API.
pub struct TwilioCallControl {
    client: reqwest::Client,
    account_sid: String,
    auth_token: SecretString,
    base_url: String,
}

#[derive(Deserialize)]
struct CallResource {
    from: Option<String>,
}

impl TwilioCallControl {
    pub fn new(account_sid: impl Into<String>, auth_token: SecretString) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(CALL_CONTROL_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            account_sid: account_sid.into(),
            auth_token,
            base_url: TWILIO_API_BASE.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn call_url(&self, call_id: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_id
        )
    }
}

/// Call-control markup that dials `destination` in place of the current call flow.
pub fn dial_twiml(destination: &str) -> String {
    format!("<Response><Dial>{}</Dial></Response>", xml_escape(destination))
}

/// Escapes text for use inside call-control markup elements and attributes.
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[async_trait]
impl CallControl for TwilioCallControl {
    async fn transfer(&self, call_id: &str, destination: &str) -> Result<(), ProviderError> {
        info!(%call_id, %destination, "Transferring call");
        self.client
            .post(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("Twiml", dial_twiml(destination))])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn lookup_caller_number(&self, call_id: &str) -> Result<String, ProviderError> {
        let call: CallResource = self
            .client
            .get(self.call_url(call_id))
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        call.from
            .filter(|number| !number.is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse(format!("call {call_id} has no caller number")))
    }
}
