//! CLI interface for bibsearch.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line interface for bibsearch.
#[derive(Parser)]
#[command(name = "bibsearch")]
#[command(author, version, about = "Structured and full-text search over a bibliography library", long_about = None)]
pub struct Cli {
    /// Library file to use instead of the configured one.
    #[arg(short = 'L', long, global = true)]
    pub library: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Search the library for entries matching a query.
    ///
    /// Examples: `year:2001 AND title:marine`, `author=~"^Smith"`,
    /// `title|abstract:fish -groups:read`, `content:university`.
    Search {
        /// The query expression.
        query: String,

        /// Also search the text of linked files.
        #[arg(short, long)]
        fulltext: bool,

        /// Use case-sensitive matching (default is case-insensitive).
        #[arg(short = 's', long)]
        case_sensitive: bool,

        /// Treat plain terms as regular expressions.
        #[arg(short, long)]
        regex: bool,

        /// Search the index as last refreshed, without reloading it.
        #[arg(long)]
        no_refresh: bool,

        /// Show which fields matched for each entry.
        #[arg(short, long)]
        explain: bool,
    },

    /// Index new and changed linked files, dropping files no longer linked.
    Index,

    /// Wipe the full-text index and index every linked file again.
    Rebuild,

    /// Remove an entry's documents from the full-text index.
    Remove {
        /// Citation key of the entry.
        key: String,
    },

    /// Parse a query and print its syntax tree as JSON.
    Parse {
        /// The query expression.
        query: String,
    },
}
