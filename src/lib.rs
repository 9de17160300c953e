//! Copy issue-tracker records from one project into another, remapping
//! fields to the destination schema and recording provenance so each record
//! is migrated at most once.

pub mod accessor;
pub mod build_info;
pub mod commands;
pub mod config;
pub mod error;
pub mod guard;
pub mod migration;
pub mod model;
pub mod output;
pub mod remap;
pub mod schema;
pub mod tracker;
pub mod transform;
