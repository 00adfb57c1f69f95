//! Provenance — BLAKE3 hashing and the append-only apply event log.

pub mod eventlog;
pub mod hasher;
