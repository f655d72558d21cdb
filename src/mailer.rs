use async_trait::async_trait;
use tracing::info;

use crate::model::Booking;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug)]
pub struct MailError(pub String);

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mail delivery failed: {}", self.0)
    }
}

impl std::error::Error for MailError {}

/// Outbound email. The engine never awaits delivery on a request path.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// Writes mail to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        info!(to = %mail.to, subject = %mail.subject, "mail");
        Ok(())
    }
}

pub(crate) fn new_booking_mail(admin: &str, room_name: &str, booking: &Booking) -> Mail {
    Mail {
        to: admin.to_string(),
        subject: format!("New booking request for {room_name}"),
        body: format!(
            "{} ({}) requested {} on {} from {} to {}.\nPurpose: {}",
            booking.user_name,
            booking.user_email,
            room_name,
            booking.date,
            booking.start_time(),
            booking.end_time(),
            booking.purpose,
        ),
    }
}

pub(crate) fn status_mail(room_name: &str, booking: &Booking) -> Mail {
    Mail {
        to: booking.user_email.clone(),
        subject: format!("Your booking for {room_name} was {}", booking.status),
        body: format!(
            "Hello {},\n\nYour booking of {} on {} from {} to {} is now {}.",
            booking.user_name,
            room_name,
            booking.date,
            booking.start_time(),
            booking.end_time(),
            booking.status,
        ),
    }
}
