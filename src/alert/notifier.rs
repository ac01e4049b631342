use crate::config::NotifierConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counts of a fan-out over one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryTally {
    pub attempted: usize,
    pub succeeded: usize,
}

impl DeliveryTally {
    pub fn merge(self, other: DeliveryTally) -> DeliveryTally {
        DeliveryTally {
            attempted: self.attempted + other.attempted,
            succeeded: self.succeeded + other.succeeded,
        }
    }
}

/// Outbound SMS and email transport.
///
/// Implementations report failure through the returned flag and never error;
/// a failed send is logged by the implementation and otherwise ignored.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_sms(&self, number: &str, text: &str) -> bool;

    async fn send_email(&self, address: &str, subject: &str, body: &str) -> bool;

    fn name(&self) -> &str {
        "notifier"
    }

    /// Send the same text to every number; empty lists are a no-op
    async fn sms_all(&self, numbers: &[String], text: &str) -> DeliveryTally {
        let mut tally = DeliveryTally::default();
        for number in numbers {
            tally.attempted += 1;
            if self.send_sms(number, text).await {
                tally.succeeded += 1;
            }
        }
        tally
    }

    /// Send the same email to every address; empty lists are a no-op
    async fn email_all(&self, addresses: &[String], subject: &str, body: &str) -> DeliveryTally {
        let mut tally = DeliveryTally::default();
        for address in addresses {
            tally.attempted += 1;
            if self.send_email(address, subject, body).await {
                tally.succeeded += 1;
            }
        }
        tally
    }
}

/// Logs every message instead of sending it
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_sms(&self, number: &str, text: &str) -> bool {
        info!("Simulated SMS to {}: {}", number, text);
        true
    }

    async fn send_email(&self, address: &str, subject: &str, _body: &str) -> bool {
        info!("Simulated email to {}: {}", address, subject);
        true
    }

    fn name(&self) -> &str {
        "log"
    }
}

struct TwilioCredentials {
    account_sid: String,
    auth_token: String,
    from_number: String,
}

struct MailRelay {
    url: String,
    api_key: Option<String>,
    sender: String,
}

/// SMS through the Twilio Messages API and email through an HTTP mail relay.
///
/// A channel whose credentials are missing is simulated through
/// [`LogNotifier`].
pub struct HttpNotifier {
    http: Client,
    twilio_api_url: String,
    twilio: Option<TwilioCredentials>,
    mail: Option<MailRelay>,
    fallback: LogNotifier,
}

impl HttpNotifier {
    pub fn new(config: &NotifierConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let twilio = match (
            non_empty(&config.twilio_account_sid),
            non_empty(&config.twilio_auth_token),
        ) {
            (Some(account_sid), Some(auth_token)) => Some(TwilioCredentials {
                account_sid,
                auth_token,
                from_number: non_empty(&config.twilio_number).unwrap_or_default(),
            }),
            _ => None,
        };

        let mail = match (non_empty(&config.mail_api_url), non_empty(&config.sender_email)) {
            (Some(url), Some(sender)) => Some(MailRelay {
                url,
                api_key: non_empty(&config.mail_api_key),
                sender,
            }),
            _ => None,
        };

        if twilio.is_none() {
            info!("SMS transport not configured, messages will be simulated");
        }
        if mail.is_none() {
            info!("Email transport not configured, messages will be simulated");
        }

        Ok(Self {
            http,
            twilio_api_url: config.twilio_api_url.trim_end_matches('/').to_string(),
            twilio,
            mail,
            fallback: LogNotifier,
        })
    }

    pub fn sms_configured(&self) -> bool {
        self.twilio.is_some()
    }

    pub fn email_configured(&self) -> bool {
        self.mail.is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_sms(&self, number: &str, text: &str) -> bool {
        let Some(twilio) = &self.twilio else {
            return self.fallback.send_sms(number, text).await;
        };

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.twilio_api_url, twilio.account_sid
        );
        let form = [
            ("To", number),
            ("From", twilio.from_number.as_str()),
            ("Body", text),
        ];

        match self
            .http
            .post(&url)
            .basic_auth(&twilio.account_sid, Some(&twilio.auth_token))
            .form(&form)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("SMS sent to {}", number);
                true
            }
            Ok(response) => {
                warn!("SMS to {} rejected with status {}", number, response.status());
                false
            }
            Err(e) => {
                warn!("Error sending SMS to {}: {}", number, e);
                false
            }
        }
    }

    async fn send_email(&self, address: &str, subject: &str, body: &str) -> bool {
        let Some(mail) = &self.mail else {
            return self.fallback.send_email(address, subject, body).await;
        };

        let mut request = self.http.post(&mail.url).json(&json!({
            "from": mail.sender,
            "to": address,
            "subject": subject,
            "html": body,
        }));
        if let Some(key) = &mail.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Email sent to {}", address);
                true
            }
            Ok(response) => {
                warn!("Email to {} rejected with status {}", address, response.status());
                false
            }
            Err(e) => {
                warn!("Error sending email to {}: {}", address, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
