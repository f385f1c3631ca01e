pub mod deliveries;
pub mod events;
pub mod health;
pub mod webhooks;
