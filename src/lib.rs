//! Warden: one device credential, guarded remote commands, and a kiosk lockdown.
//!
//! The credential is AES-256-GCM encrypted under a non-exportable key and
//! gates two privileged flows: interactive verification (with an optional
//! biometric shortcut) and remote commands delivered as plaintext messages.
//! The lockdown pins the device to one package and restores its previous
//! restrictions exactly on exit.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod store;

pub mod keystore;
pub mod vault;

pub mod biometric;
pub mod executor;
pub mod gateway;
pub mod lockdown;
