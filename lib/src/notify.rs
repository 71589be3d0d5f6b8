//! Outbound notifications (spec §4.10, supplementing spec §4.6's mail
//! behavior): the seam the sync protocol and save pipeline use to send
//! mail without depending on an SMTP stack directly. `scriptura-server`
//! backs this with `lettre`; tests use a recording fake.

/// A single notification to send. Kept as plain fields rather than a
/// templated type since the handful of call sites (denied submission,
/// nightly digest) each build their own body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: Notification);
}

/// Discards every notification. Useful for installations with no mail
/// transport configured, and for tests that don't care about mail.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _message: Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_notifier_discards() {
        NullNotifier.notify(Notification {
            to: "x".to_string(),
            subject: "x".to_string(),
            body: "x".to_string(),
        });
    }
}
