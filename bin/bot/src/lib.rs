//! Planning poker Telegram bot.
//!
//! This crate wires the dialog engine and the estimation domain to the
//! Telegram Bot API: inbound updates become [`event::InboundEvent`]s,
//! [`handlers::BotApp`] routes them through the dispatcher into flow and
//! one-shot handlers, and [`notifier::Notifier`] delivers the screens.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handlers;
pub mod notifier;
pub mod telegram;
pub mod view;
