use clap::Parser;
use bibsearch::cli::{Cli, Commands};
use bibsearch::commands::{self, SearchOptions};
use bibsearch::config::Config;
use bibsearch::logging;
use bibsearch::search::MatchedLocation;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;
    logging::init(&config.logging, cli.verbose);

    let library = cli.library.as_deref();

    match cli.command {
        Some(Commands::Search {
            query,
            fulltext,
            case_sensitive,
            regex,
            no_refresh,
            explain,
        }) => {
            let options = SearchOptions {
                fulltext,
                case_sensitive,
                regex,
                no_refresh,
            };
            let hits = commands::search(&config, library, &query, &options)?;

            if hits.is_empty() {
                println!("No matches found for '{query}'");
                return Ok(());
            }

            for hit in &hits {
                match &hit.title {
                    Some(title) => println!("{}  [{}]  {title}", hit.key, hit.entry_type),
                    None => println!("{}  [{}]", hit.key, hit.entry_type),
                }
                if explain && !hit.locations.is_empty() {
                    let locations: Vec<&str> = hit
                        .locations
                        .iter()
                        .map(|l| match l {
                            MatchedLocation::Field(name) => name.as_str(),
                            MatchedLocation::Content => "content",
                        })
                        .collect();
                    println!("    matched in: {}", locations.join(", "));
                }
            }
            println!("\n{} result(s) found", hits.len());
            Ok(())
        }
        Some(Commands::Index) => {
            let stats = commands::index(&config, library)?;
            println!(
                "Indexed {} file(s), {} unchanged, {} removed, {} failed",
                stats.indexed, stats.unchanged, stats.removed, stats.failed
            );
            Ok(())
        }
        Some(Commands::Rebuild) => {
            let stats = commands::rebuild(&config, library)?;
            println!(
                "Rebuilt index: {} file(s) indexed, {} failed",
                stats.indexed, stats.failed
            );
            Ok(())
        }
        Some(Commands::Remove { key }) => {
            if commands::remove(&config, library, &key)? {
                println!("Removed indexed documents for '{key}'");
            } else {
                println!("Removed indexed documents for '{key}' (not in library)");
            }
            Ok(())
        }
        Some(Commands::Parse { query }) => {
            println!("{}", commands::parse_query(&query)?);
            Ok(())
        }
        None => {
            Cli::parse_from(["bibsearch", "--help"]);
            Ok(())
        }
    }
}
