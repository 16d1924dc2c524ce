pub mod checksum;
pub mod config;
pub mod dates;
pub mod error;
pub mod geokb;
pub mod linkage;
pub mod logging;
pub mod pdf;
pub mod pipeline;
pub mod ports;
pub mod reconcile;
pub mod sciencebase;
pub mod types;
pub mod zotero;
