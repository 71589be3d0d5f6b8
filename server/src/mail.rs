//! SMTP-backed [`Notifier`], used for denied-submission alerts and the
//! nightly change digest.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::Message;
use lettre::SmtpTransport;
use lettre::Transport as _;
use scriptura_core::notify::Notification;
use scriptura_core::notify::Notifier;

use crate::config::SmtpConfig;

pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, lettre::transport::smtp::Error> {
        let transport = if config.username.is_empty() {
            SmtpTransport::relay(&config.relay)?.build()
        } else {
            SmtpTransport::relay(&config.relay)?
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build()
        };
        let from = config
            .from_address
            .parse()
            .unwrap_or_else(|_| "scriptura@example.invalid".parse().unwrap());
        Ok(Self { transport, from })
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, message: Notification) {
        let Ok(to) = message.to.parse::<Mailbox>() else {
            tracing::warn!(to = %message.to, "cannot send notification, invalid address");
            return;
        };
        let email = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .body(message.body)
        {
            Ok(email) => email,
            Err(err) => {
                tracing::error!(%err, "failed to build notification email");
                return;
            }
        };
        if let Err(err) = self.transport.send(&email) {
            tracing::error!(%err, "failed to send notification email");
        }
    }
}
