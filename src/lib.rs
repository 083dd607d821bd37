//! PayFast payment integration: signed payment requests and verified ITN callbacks.
//!
//! The crate sits between a merchant application and the PayFast hosted payment
//! gateway. Outbound, it builds the field set a buyer's browser submits to the
//! gateway and signs it. Inbound, it is the trust boundary for the gateway's
//! asynchronous payment notifications (ITN): nothing reaches the merchant's order
//! state unless it came from a gateway host, carries a valid signature and was
//! confirmed by the gateway itself.
//!
//! # Modules
//!
//! - [`fields`] - Flat field maps exchanged with the gateway.
//! - [`signature`] - Canonical string and MD5 signature shared by both directions.
//! - [`money`] - Parsing and two-decimal formatting of amounts.
//! - [`payment`] - Building signed payment requests.
//! - [`gateway`] - Sandbox and production endpoints.
//! - [`origin`] - Provenance check of notification callers.
//! - [`validator`] - Echo-validation round-trip with the gateway.
//! - [`notification`] - The notification verification pipeline.
//! - [`order`] - Hand-off of verified notifications to the merchant.
//! - [`config`] - Server configuration.
//! - [`handlers`] - HTTP endpoints.
//! - [`run`] - Server assembly and startup.
//! - [`util`] - Env-aware config values, logging and signal handling.

pub mod config;
pub mod fields;
pub mod gateway;
pub mod handlers;
pub mod money;
pub mod notification;
pub mod order;
pub mod origin;
pub mod payment;
pub mod run;
pub mod signature;
pub mod util;
pub mod validator;
