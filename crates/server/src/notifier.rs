//! Mail relay notifier: renders customer emails with tera and posts them to
//! an HTTP relay. Rendering happens inline; the relay call runs on its own task
//! so a slow relay never holds up the transition that asked for the email.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{info, warn};

use fleetquote_core::config::NotificationConfig;
use fleetquote_core::domain::quote::Quote;
use fleetquote_core::flows::QuoteOutcome;
use fleetquote_core::ports::{NotificationError, Notifier};
use fleetquote_core::tokens::ApprovalToken;

const QUOTE_READY_TEMPLATE: &str = "quote_ready.txt";
const QUOTE_OUTCOME_TEMPLATE: &str = "quote_outcome.txt";

/// Payload accepted by the relay's send endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
struct RelayTransport {
    client: Client,
    relay_url: String,
    api_key: Option<SecretString>,
}

impl RelayTransport {
    async fn deliver(&self, message: &MailMessage) -> Result<(), NotificationError> {
        let mut request = self.client.post(&self.relay_url).json(message);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response =
            request.send().await.map_err(|e| NotificationError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotificationError::Rejected { status: response.status().as_u16() });
        }
        info!(
            event_name = "notification.delivered",
            subject = %message.subject,
            "email handed to relay"
        );
        Ok(())
    }
}

pub struct MailRelayNotifier {
    transport: RelayTransport,
    from_address: String,
    public_base_url: String,
    templates: Arc<Tera>,
}

fn init_templates() -> Result<Arc<Tera>, NotificationError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        (QUOTE_READY_TEMPLATE, include_str!("../../../templates/email/quote_ready.txt")),
        (QUOTE_OUTCOME_TEMPLATE, include_str!("../../../templates/email/quote_outcome.txt")),
    ])
    .map_err(|e| NotificationError::Template(e.to_string()))?;
    Ok(Arc::new(tera))
}

impl MailRelayNotifier {
    pub fn from_config(config: &NotificationConfig) -> Result<Self, NotificationError> {
        let relay_url = config
            .relay_url
            .clone()
            .ok_or_else(|| NotificationError::Transport("relay_url is not configured".to_owned()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        Ok(Self {
            transport: RelayTransport { client, relay_url, api_key: config.api_key.clone() },
            from_address: config.from_address.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_owned(),
            templates: init_templates()?,
        })
    }

    fn base_context(&self, quote: &Quote) -> Context {
        let mut context = Context::new();
        context.insert("quote_id", &quote.id.0);
        context.insert("customer_name", &quote.contact.name);
        context.insert("vehicle", quote.trip.vehicle_class.label());
        context.insert("pickup", &quote.trip.pickup_location);
        context.insert("dropoff", &quote.trip.dropoff_location);
        context.insert("trip_date", &quote.trip.trip_date.format("%-d %B %Y").to_string());
        context.insert("round_trip", &!quote.trip.is_one_way);
        context
    }

    pub fn render_quote_ready(
        &self,
        quote: &Quote,
        final_price: Decimal,
        notes: Option<&str>,
        token: Option<&ApprovalToken>,
    ) -> Result<MailMessage, NotificationError> {
        let mut context = self.base_context(quote);
        context.insert("final_price", &final_price.to_string());
        context.insert("notes", &notes.map(str::trim).filter(|notes| !notes.is_empty()));
        context.insert("dashboard_url", &format!("{}/dashboard", self.public_base_url));
        match token {
            Some(token) => {
                let respond = format!(
                    "{}/quotes/{}/respond?token={}",
                    self.public_base_url,
                    quote.id,
                    token.as_str()
                );
                context.insert("accept_url", &format!("{respond}&action=accept"));
                context.insert("decline_url", &format!("{respond}&action=decline"));
                context.insert(
                    "expires_at",
                    &quote
                        .token_expires_at
                        .map(|expires| expires.format("%-d %B %Y %H:%M UTC").to_string()),
                );
            }
            None => context.insert("accept_url", &Option::<String>::None),
        }

        let body = self
            .templates
            .render(QUOTE_READY_TEMPLATE, &context)
            .map_err(|e| NotificationError::Template(e.to_string()))?;
        Ok(MailMessage {
            from: self.from_address.clone(),
            to: quote.contact.email.clone(),
            subject: format!("Your transport quote {} is ready", quote.id),
            body,
        })
    }

    pub fn render_outcome(
        &self,
        quote: &Quote,
        outcome: QuoteOutcome,
    ) -> Result<MailMessage, NotificationError> {
        let mut context = self.base_context(quote);
        context.insert("outcome", outcome.as_str());
        context.insert("final_price", &quote.final_price.map(|price| price.to_string()));

        let body = self
            .templates
            .render(QUOTE_OUTCOME_TEMPLATE, &context)
            .map_err(|e| NotificationError::Template(e.to_string()))?;
        let subject = match outcome {
            QuoteOutcome::Accepted => format!("Booking confirmed for quote {}", quote.id),
            QuoteOutcome::Declined => format!("Quote {} declined", quote.id),
        };
        Ok(MailMessage {
            from: self.from_address.clone(),
            to: quote.contact.email.clone(),
            subject,
            body,
        })
    }

    /// Posts `message` and waits for the relay's answer.
    pub async fn deliver(&self, message: &MailMessage) -> Result<(), NotificationError> {
        self.transport.deliver(message).await
    }

    /// Hands `message` to a background task; relay failures are logged there.
    fn dispatch(&self, message: MailMessage) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(error) = transport.deliver(&message).await {
                warn!(
                    event_name = "notification.delivery_failed",
                    to = %message.to,
                    subject = %message.subject,
                    error = %error,
                    "relay did not accept the email"
                );
            }
        });
    }
}

#[async_trait]
impl Notifier for MailRelayNotifier {
    async fn send_quote_ready(
        &self,
        quote: &Quote,
        final_price: Decimal,
        notes: Option<&str>,
        token: Option<&ApprovalToken>,
    ) -> Result<(), NotificationError> {
        let message = self.render_quote_ready(quote, final_price, notes, token)?;
        self.dispatch(message);
        Ok(())
    }

    async fn send_outcome(
        &self,
        quote: &Quote,
        outcome: QuoteOutcome,
    ) -> Result<(), NotificationError> {
        let message = self.render_outcome(quote, outcome)?;
        self.dispatch(message);
        Ok(())
    }
}
