//! Hyper-V adapter.
//!
//! Every operation is one PowerShell invocation; queries ask for
//! `ConvertTo-Json` so no tabular output ever gets scraped. Requires the
//! Hyper-V module to be importable, which is probed once at construction.

mod backend;
mod query;

pub use backend::HyperVBackend;
