//! Data access layer for the Flota fleet-maintenance backend.
//!
//! Everything the application persists (buses, embarked equipment, incidents,
//! work orders, maintenance plans, ...) goes through a tenant-scoped
//! [`service::CollectionService`] built on top of the Cloud Firestore REST API.
//! The service layer adds soft deletion, change auditing, cursor pagination,
//! tokenized term search and realtime listeners on top of the raw document
//! store.

pub mod core;
pub mod firestore;
pub mod service;

use crate::core::middleware::AuthMiddleware;
use firestore::Firestore;
use yup_oauth2::ServiceAccountKey;

/// Entry point holding the service-account credentials for a deployment.
pub struct FlotaApp {
    key: ServiceAccountKey,
}

impl FlotaApp {
    pub fn new(service_account_key: ServiceAccountKey) -> Self {
        Self {
            key: service_account_key,
        }
    }

    /// Returns a Firestore handle authenticated with this app's credentials.
    pub fn firestore(&self) -> Firestore {
        Firestore::new(AuthMiddleware::new(self.key.clone()))
    }
}
