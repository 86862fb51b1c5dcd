use tracing::{debug, warn};

/// Fire-and-forget transactional email. Not part of any operation's
/// correctness contract: implementations log failures and never propagate
/// them.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, html: &str);
}

/// Default mailer: records the send in the log. Deployments wire a real
/// delivery service behind the same trait.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, to: &str, subject: &str, html: &str) {
        if html.is_empty() {
            warn!(to, subject, "dropping email with empty body");
            return;
        }
        debug!(to, subject, "email queued");
    }
}
