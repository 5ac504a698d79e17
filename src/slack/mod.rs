//! Slack platform integration: wire types, the client boundary, the Web API
//! client and request signature verification.

pub mod api;
pub mod client;
pub mod signature;
pub mod types;

pub use api::{SlackClient, SlackTokens};
pub use client::{
    OAuthTokens, OutgoingMessage, PlatformClient, RepliesPage, UploadTarget, UploadedFile,
};
pub use signature::SignatureVerifier;
