pub mod email;
pub mod notifier;
pub mod payments;
pub mod qr;
pub mod youtube;

pub use email::{Mailer, Notification};
pub use notifier::Notifier;
pub use payments::CashfreeClient;
pub use youtube::YoutubeClient;
