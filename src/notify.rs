//! Outbound notifications: templated mail through the mail API and
//! temporary-password SMS through the gateway.
//!
//! Senders report failure through `SendOutcome` instead of `Err` so bulk
//! loops can record the item and keep going.

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::{error, info};

use crate::config;

/// Result of one send attempt. `success == false` carries the provider
/// error text; it is never turned into an `Err` by the senders themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Templated mail sends used by the sheet processors and bulk jobs.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(
        &self,
        username: &str,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> SendOutcome;

    async fn send_reset_password(&self, email: &str, full_name: &str, password: &str)
        -> SendOutcome;

    /// The payslip mail links to `{domain}/payments/{indicator}/{authorization}`.
    async fn send_payslip(
        &self,
        email: &str,
        full_name: &str,
        month: &str,
        year: &str,
        payment_indicator: &str,
        ui_authorization: &str,
    ) -> SendOutcome;

    async fn send_cms_welcome(
        &self,
        email: &str,
        full_name: &str,
        username: &str,
        password: &str,
    ) -> SendOutcome;

    async fn send_ornato(&self, email: &str, full_name: &str, year: &str) -> SendOutcome;
}

/// Temporary-password SMS.
#[async_trait::async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_password(&self, contact: &str, password: &str) -> SendOutcome;
}

/// Mail API client. Posts a template name plus variables; the API owns the
/// HTML rendering.
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    base_url: Url,
    token: String,
    domain: String,
}

impl fmt::Debug for HttpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMailer")
            .field("base_url", &self.base_url)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct MailResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "messageId")]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpMailer {
    pub fn new(cfg: &config::Mail) -> Result<Self> {
        let http = Client::builder()
            .user_agent("planilla-sync/0.1")
            .build()
            .context("failed to build http client")?;
        let base_url = Url::parse(&cfg.base_url).context("invalid mail base URL")?;
        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone(),
            domain: cfg.domain.clone(),
        })
    }

    async fn send_template(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        variables: serde_json::Value,
    ) -> SendOutcome {
        let recipient = to.trim();
        if recipient.is_empty() {
            return SendOutcome::failed("Destinatario vacío: no se puede enviar el correo");
        }

        let endpoint = match self.base_url.join("v1/mail/send") {
            Ok(url) => url,
            Err(err) => return SendOutcome::failed(format!("invalid mail endpoint: {err}")),
        };
        let body = json!({
            "to": recipient,
            "subject": subject,
            "template": template,
            "variables": variables,
        });

        let resp = self
            .http
            .post(endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await;
        match resp {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<MailResponse>().await {
                    Ok(parsed) if parsed.success => {
                        info!(to = recipient, template, "mail sent");
                        SendOutcome::ok(parsed.message_id)
                    }
                    Ok(parsed) => SendOutcome::failed(
                        parsed.error.unwrap_or_else(|| "mail rejected".into()),
                    ),
                    Err(err) => SendOutcome::failed(format!("invalid mail response: {err}")),
                },
                Err(err) => {
                    error!(?err, to = recipient, template, "mail send failed");
                    SendOutcome::failed(err.to_string())
                }
            },
            Err(err) => {
                error!(?err, to = recipient, template, "mail send failed");
                SendOutcome::failed(err.to_string())
            }
        }
    }
}

#[async_trait::async_trait]
impl Mailer for HttpMailer {
    async fn send_welcome(
        &self,
        username: &str,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> SendOutcome {
        let variables = json!({
            "username": username,
            "password": password,
            "fullName": full_name,
            "domain": self.domain,
            "company": "Cellus",
            "companyName": "CELLUS S.A",
            "year": chrono::Utc::now().format("%Y").to_string(),
        });
        self.send_template(email, "Bienvenido a Cellus", "welcome", variables)
            .await
    }

    async fn send_reset_password(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
    ) -> SendOutcome {
        let variables = json!({
            "fullName": full_name,
            "password": password,
            "domain": self.domain,
            "year": chrono::Utc::now().format("%Y").to_string(),
        });
        self.send_template(
            email,
            "Restablecimiento de contraseña",
            "resetPassword",
            variables,
        )
        .await
    }

    async fn send_payslip(
        &self,
        email: &str,
        full_name: &str,
        month: &str,
        year: &str,
        payment_indicator: &str,
        ui_authorization: &str,
    ) -> SendOutcome {
        let variables = json!({
            "fullName": full_name,
            "month": month,
            "year": year,
            "domain": format!(
                "{}/payments/{payment_indicator}/{ui_authorization}",
                self.domain
            ),
        });
        self.send_template(email, "Boleta de Pago - CELLUS S.A", "boleta", variables)
            .await
    }

    async fn send_cms_welcome(
        &self,
        email: &str,
        full_name: &str,
        username: &str,
        password: &str,
    ) -> SendOutcome {
        let variables = json!({
            "fullName": full_name,
            "username": username,
            "password": password,
            "domain": self.domain,
            "year": chrono::Utc::now().format("%Y").to_string(),
        });
        self.send_template(
            email,
            "Bienvenido/a a CELLUS S.A",
            "welcomeCMS",
            variables,
        )
        .await
    }

    async fn send_ornato(&self, email: &str, full_name: &str, year: &str) -> SendOutcome {
        let variables = json!({
            "fullName": full_name,
            "year": year,
        });
        self.send_template(
            email,
            "Boleto de Ornato - CELLUS S.A",
            "boletoOrnato",
            variables,
        )
        .await
    }
}

/// SMS gateway client.
#[derive(Clone)]
pub struct HttpSms {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for HttpSms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSms")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SmsResponseCode {
    #[serde(default, rename = "responseCode")]
    response_code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl SmsResponseCode {
    fn is_success(&self) -> bool {
        self.status == "SUCCESS" || self.response_code == "1"
    }
}

#[derive(Debug, Deserialize)]
struct SmsResponse {
    #[serde(rename = "SendSMSResponseCode")]
    code: SmsResponseCode,
}

impl HttpSms {
    pub fn new(cfg: &config::Sms) -> Result<Self> {
        let http = Client::builder()
            .user_agent("planilla-sync/0.1")
            .build()
            .context("failed to build http client")?;
        let base_url = Url::parse(&cfg.base_url).context("invalid sms base URL")?;
        Ok(Self {
            http,
            base_url,
            token: cfg.token.clone(),
        })
    }
}

#[async_trait::async_trait]
impl SmsSender for HttpSms {
    async fn send_password(&self, contact: &str, password: &str) -> SendOutcome {
        let endpoint = match self.base_url.join("send-sms") {
            Ok(url) => url,
            Err(err) => return SendOutcome::failed(format!("invalid sms endpoint: {err}")),
        };
        let body = json!({
            "number": contact,
            "message": format!("Su contraseña temporal es: {password}"),
            "reason": "Cambio de contraseña - Payments",
        });

        info!(contact, "sending temporary password SMS");
        let resp = self
            .http
            .post(endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await;
        match resp {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.json::<SmsResponse>().await {
                    Ok(parsed) if parsed.code.is_success() => SendOutcome::ok(None),
                    Ok(parsed) => SendOutcome::failed(parsed.code.message),
                    Err(err) => SendOutcome::failed(format!("invalid sms response: {err}")),
                },
                Err(err) => {
                    error!(?err, contact, "sms send failed");
                    SendOutcome::failed(err.to_string())
                }
            },
            Err(err) => {
                error!(?err, contact, "sms send failed");
                SendOutcome::failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        let ok = SendOutcome::ok(Some("abc-123".into()));
        assert!(ok.success);
        assert_eq!(ok.message_id.as_deref(), Some("abc-123"));
        assert!(ok.error.is_none());

        let failed = SendOutcome::failed("smtp timeout");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn empty_recipient_is_rejected_locally() {
        let mailer = HttpMailer::new(&config::Mail {
            base_url: "http://127.0.0.1:9".into(),
            token: "t".into(),
            domain: "https://cms.example.com.gt".into(),
        })
        .unwrap();
        let out = mailer.send_welcome("u1", "   ", "Ana", "pw").await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("Destinatario vacío"));
    }
}
