//! bibsearch - structured and full-text search over a bibliography library.
//!
//! Queries mix field predicates (`year:2001`, `author=~"^Smith"`) with
//! free text that may be found in the files linked from an entry. Metadata
//! is matched in memory; linked-file text lives in a tantivy index.
//!
//! # Modules
//!
//! - [`query`] - Query language: syntax tree, parser, flags
//! - [`library`] - Bibliography entries and library loading
//! - [`extract`] - Text extraction from linked files
//! - [`search`] - Structured matcher, full-text index, hybrid coordinator
//! - [`commands`] - High-level operations (search, index, rebuild, remove)
//! - [`config`] - Configuration loading
//! - [`logging`] - Tracing subscriber setup
//! - [`cli`] - Command-line interface definitions

pub mod cli;
pub mod commands;
pub mod config;
pub mod extract;
pub mod library;
pub mod logging;
pub mod query;
pub mod search;
