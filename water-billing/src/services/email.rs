//! Bill notification delivery.

use crate::config::SmtpConfig;
use crate::models::{Bill, BillLineItem, BillingPeriod, Customer};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("Notifier not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

/// Everything needed to render one bill notification.
#[derive(Debug, Clone)]
pub struct BillNotice<'a> {
    pub recipient: &'a str,
    pub customer: &'a Customer,
    pub period: &'a BillingPeriod,
    pub bill: &'a Bill,
    pub line_items: &'a [BillLineItem],
}

impl BillNotice<'_> {
    pub fn subject(&self) -> String {
        format!(
            "Your water bill for {} to {}",
            self.period.period_start, self.period.period_end
        )
    }

    pub fn body_text(&self) -> String {
        let mut body = format!(
            "Hello {},\n\nYour water bill for {} to {} is ready.\n\nUsage: {} CCF\n\n",
            self.customer.name,
            self.period.period_start,
            self.period.period_end,
            self.bill.usage_quantity
        );
        for item in self.line_items {
            body.push_str(&format!("  {:<40} {:>10}\n", item.description, item.amount));
        }
        body.push_str(&format!(
            "\nTotal due: {}\nDue date: {}\nBill reference: {}\n",
            self.bill.total_amount, self.bill.due_date, self.bill.bill_id
        ));
        body
    }

    pub fn body_html(&self) -> String {
        let rows: String = self
            .line_items
            .iter()
            .map(|item| {
                format!(
                    "<tr><td>{}</td><td style=\"text-align:right\">{}</td></tr>",
                    escape_html(&item.description),
                    item.amount
                )
            })
            .collect();
        format!(
            "<p>Hello {},</p>\
             <p>Your water bill for {} to {} is ready.</p>\
             <p>Usage: {} CCF</p>\
             <table>{}</table>\
             <p><strong>Total due: {}</strong><br/>Due date: {}</p>\
             <p>Bill reference: {}</p>",
            escape_html(&self.customer.name),
            self.period.period_start,
            self.period.period_end,
            self.bill.usage_quantity,
            rows,
            self.bill.total_amount,
            self.bill.due_date,
            self.bill.bill_id
        )
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
pub trait BillNotifier: Send + Sync {
    async fn send_bill_notification(&self, notice: &BillNotice<'_>) -> Result<(), NotifierError>;

    async fn health_check(&self) -> Result<(), NotifierError>;
}

pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifierError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| {
                NotifierError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }
}

#[async_trait]
impl BillNotifier for SmtpNotifier {
    async fn send_bill_notification(&self, notice: &BillNotice<'_>) -> Result<(), NotifierError> {
        if !self.config.enabled {
            return Err(NotifierError::NotEnabled(
                "SMTP bill notifier is not enabled".to_string(),
            ));
        }

        let transport = self.transport.as_ref().ok_or_else(|| {
            NotifierError::Configuration("SMTP transport not initialized".to_string())
        })?;

        let from = format!("{} <{}>", self.config.from_name, self.config.from_email);
        let from_mailbox: Mailbox = from
            .parse()
            .map_err(|e| NotifierError::Configuration(format!("Invalid from address: {}", e)))?;

        let to_mailbox: Mailbox = notice
            .recipient
            .parse()
            .map_err(|e| NotifierError::InvalidRecipient(format!("{}: {}", notice.recipient, e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(notice.subject())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(notice.body_text()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(notice.body_html()),
                    ),
            )
            .map_err(|e| NotifierError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifierError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(
            bill_id = %notice.bill.bill_id,
            to = %notice.recipient,
            "Bill notification sent"
        );

        Ok(())
    }

    async fn health_check(&self) -> Result<(), NotifierError> {
        if !self.config.enabled {
            return Ok(());
        }

        let transport = self.transport.as_ref().ok_or_else(|| {
            NotifierError::Configuration("SMTP transport not initialized".to_string())
        })?;

        transport
            .test_connection()
            .await
            .map_err(|e| NotifierError::SendFailed(format!("SMTP connection test failed: {}", e)))?;

        Ok(())
    }
}

/// Recording notifier for tests.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<(Uuid, String)>>,
    failing_recipients: Mutex<HashSet<String>>,
    disabled: Mutex<bool>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sends to this address fail.
    pub async fn fail_for(&self, recipient: &str) {
        self.failing_recipients
            .lock()
            .await
            .insert(recipient.to_string());
    }

    /// Behave like an SMTP notifier with delivery switched off.
    pub async fn set_enabled(&self, enabled: bool) {
        *self.disabled.lock().await = !enabled;
    }

    pub async fn clear_failures(&self) {
        self.failing_recipients.lock().await.clear();
    }

    /// `(bill_id, recipient)` pairs in send order.
    pub async fn sent(&self) -> Vec<(Uuid, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl BillNotifier for MockNotifier {
    async fn send_bill_notification(&self, notice: &BillNotice<'_>) -> Result<(), NotifierError> {
        if *self.disabled.lock().await {
            return Err(NotifierError::NotEnabled("mock notifier disabled".to_string()));
        }

        if self.failing_recipients.lock().await.contains(notice.recipient) {
            return Err(NotifierError::SendFailed(format!(
                "mailbox {} unavailable",
                notice.recipient
            )));
        }

        self.sent
            .lock()
            .await
            .push((notice.bill.bill_id, notice.recipient.to_string()));

        tracing::info!(
            bill_id = %notice.bill.bill_id,
            to = %notice.recipient,
            "[MOCK] Bill notification would be sent"
        );

        Ok(())
    }

    async fn health_check(&self) -> Result<(), NotifierError> {
        Ok(())
    }
}
