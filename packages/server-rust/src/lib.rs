//! `CardVault` server: API gateway, collection-event fan-out and the bulk catalog importer.

pub mod collection;
pub mod events;
pub mod gateway;
pub mod importer;
pub mod network;
pub mod service;
pub mod storage;
pub mod telemetry;
