//! Bot de Telegram sobre la API HTTP: consultar objetos y leer o cambiar ajustes desde el chat.

pub mod client;
pub mod replies;

#[cfg(feature = "telegram")]
pub mod bot;
