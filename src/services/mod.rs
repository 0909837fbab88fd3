//! Core of the upload pipeline: sniff, fingerprint, place, map.

pub mod file_service;
pub mod fingerprint;
pub mod placement;
pub mod sniff;
pub mod url_mapper;
