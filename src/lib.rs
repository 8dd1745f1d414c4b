//! Prompt-plus-images editing against a Gemini image model.
//!
//! Files go through [`intake::ImageIntake`], a submission is assembled by
//! [`gemini::build_request`], sent by [`backoff::BackoffClient`], and the whole
//! lifecycle is owned by [`session::SessionController`].

pub mod backoff;
pub mod config;
pub mod error;
pub mod gemini;
pub mod intake;
pub mod models;
pub mod routes;
pub mod session;
