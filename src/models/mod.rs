pub mod booking;
pub mod payment;
pub mod referral;
pub mod ticket;
pub mod user;
