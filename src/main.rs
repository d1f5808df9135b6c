use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use stationdb::api::types::{format_date, time_ago, Battlestation, Part};
use stationdb::api::{profile_role_lookup, ApiClient, CachedClient};
use stationdb::cache::{QueryClient, QueryResult};
use stationdb::config::Config;
use stationdb::params::{self, ListQuery, ParamSchema, SortDirection};
use stationdb::session::{AuthSession, StaticTokenProvider};

#[derive(Parser, Debug)]
#[command(name = "stationdb")]
#[command(about = "Browse the BattlestationDB catalog from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/stationdb/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, clap::Args)]
struct ListArgs {
  #[arg(long, default_value_t = 1)]
  page: u32,
  #[arg(long)]
  per_page: Option<u32>,
  #[arg(long)]
  sort: Option<String>,
  /// Sort descending
  #[arg(long)]
  desc: bool,
  #[arg(long)]
  search: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// List parts, optionally within one category
  Parts {
    #[command(flatten)]
    list: ListArgs,
    /// Category path, e.g. "keyboards"
    #[arg(long = "type")]
    part_type: Option<String>,
  },
  /// Show one part
  Part { id: u32 },
  /// List the part-type taxonomy
  Types,
  /// List battlestations
  Battlestations {
    #[command(flatten)]
    list: ListArgs,
  },
  /// Show one battlestation
  Battlestation { id: u32 },
  /// Featured battlestations
  Featured,
  /// List stores
  Stores {
    #[command(flatten)]
    list: ListArgs,
  },
  /// Show the signed-in profile (uses STATIONDB_USER_ID / STATIONDB_API_TOKEN)
  Profile,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing()?;

  let config = Config::load(args.config.as_deref())?;

  let api = ApiClient::new(&config.api.url);
  let queries = QueryClient::with_windows(config.cache.stale_after(), config.cache.gc_after());

  // A fixed token from the environment when present, anonymous otherwise.
  let provider = match (Config::get_user_id(), Config::get_api_token()) {
    (Ok(user_id), Ok(token)) => StaticTokenProvider::new(user_id, token),
    _ => StaticTokenProvider::anonymous(),
  };
  let session = Arc::new(AuthSession::spawn(
    Arc::new(provider),
    Some(profile_role_lookup(api.clone())),
  ));
  session.ready().await;

  let client = CachedClient::new(api, queries, session);

  match args.command {
    Command::Parts { list, part_type } => {
      let query = build_query(&params::PARTS, &list, config.results_per_page);
      print_location(&params::PARTS, &query);

      let page = take(client.parts(&query, part_type.as_deref()).await)?;
      println!(
        "{} parts (page {} of {})",
        page.total,
        query.page_number,
        page.page_count(query.results_per_page)
      );
      for part in &page.items {
        println!(
          "{:>6}  {:<40}  {:<20}  {} stations",
          part.part_id, part.name, part.manufacturer, part.battlestation_count
        );
      }
    }

    Command::Part { id } => {
      let part = take(client.part(id).await)?;
      print_part(&part);
    }

    Command::Types => {
      let mut types = take(client.part_types().await)?;
      types.sort_by_key(|t| t.display_order);
      for part_type in types {
        println!("{:>4}  {:<24}  /parts/{}", part_type.type_id, part_type.type_name, part_type.type_path);
      }
    }

    Command::Battlestations { list } => {
      let query = build_query(&params::BATTLESTATIONS, &list, config.results_per_page);
      print_location(&params::BATTLESTATIONS, &query);

      let page = take(client.battlestations(&query).await)?;
      println!(
        "{} battlestations (page {} of {})",
        page.total,
        query.page_number,
        page.page_count(query.results_per_page)
      );
      for station in &page.items {
        println!(
          "{:>6}  {:<40}  by {:<20}  {} favorites  {}",
          station.battlestation_id,
          station.name,
          station.username,
          station.favorites,
          time_ago(&station.created_date)
        );
      }
    }

    Command::Battlestation { id } => {
      let station = take(client.battlestation(id).await)?;
      print_battlestation(&station);
    }

    Command::Featured => {
      for station in take(client.featured_battlestations().await)? {
        println!(
          "{:>6}  {:<40}  by {}",
          station.battlestation_id, station.name, station.username
        );
      }
    }

    Command::Stores { list } => {
      let query = build_query(&params::STORES, &list, config.results_per_page);
      print_location(&params::STORES, &query);

      let stores = take(client.stores(&query).await)?;
      let count = take(client.store_count().await)?;
      println!("{} stores", count.value());
      for store in stores {
        println!("{:>4}  {:<30}  {} parts  {}", store.store_id, store.name, store.part_count, store.url);
      }
    }

    Command::Profile => {
      let profile = take(client.my_profile().await)?;
      println!("user:      {}", profile.username);
      println!("email:     {}", profile.email);
      println!("user id:   {}", profile.user_id);
      println!("admin:     {}", profile.is_admin);
      println!("moderator: {}", profile.is_moderator);
    }
  }

  Ok(())
}

/// Apply list flags on top of the view's defaults. Page is applied last:
/// every other setter resets it to 1.
fn build_query(schema: &ParamSchema, list: &ListArgs, config_per_page: Option<u32>) -> ListQuery {
  let mut query = schema.default_query();
  if let Some(per_page) = list.per_page.or(config_per_page) {
    query = query.with_per_page(per_page);
  }
  if let Some(sort) = &list.sort {
    query = query.with_sort(sort.clone());
  }
  if list.desc {
    query = query.with_direction(SortDirection::Desc);
  }
  if let Some(search) = &list.search {
    query = query.with_search(Some(search.clone()));
  }
  query = query.with_page(list.page);

  // Round-tripping through the schema rejects values outside it the same
  // way a pasted location string would be handled.
  schema.decode(&schema.encode(&query))
}

/// Print the shareable location string for a non-default listing.
fn print_location(schema: &ParamSchema, query: &ListQuery) {
  let encoded = schema.encode(query);
  if !encoded.is_empty() {
    println!("location: ?{encoded}");
  }
}

/// Pull the data out of a query result, or surface its error.
fn take<T>(result: QueryResult<T>) -> Result<T> {
  match (result.data, result.error) {
    (Some(data), _) => Ok(data),
    (None, Some(error)) => Err(eyre!("{error}")),
    (None, None) => Err(eyre!("no data returned")),
  }
}

fn print_part(part: &Part) {
  println!("{}  ({})", part.name, part.part_type);
  println!("manufacturer: {}", part.manufacturer);
  if let Some(url) = &part.manufacturer_url {
    println!("              {url}");
  }
  println!("used in {} battlestations", part.battlestation_count);
  if !part.stores.is_empty() {
    println!("available at:");
    for store in &part.stores {
      println!("  {:<20} {}", store.store_name, store.url);
    }
  }
}

fn print_battlestation(station: &Battlestation) {
  println!("{}  by {}", station.name, station.username);
  println!("created {}", format_date(&station.created_date));
  println!("{} favorites, {} images", station.favorites, station.images.len());
  if let Some(description) = &station.description {
    println!("\n{description}\n");
  }
  if !station.parts.is_empty() {
    println!("parts:");
    for part in &station.parts {
      println!("  {:>6}  {:<40}  {}", part.part_id, part.name, part.type_name);
    }
  }
}

/// Log to a rolling file under the user data dir; stdout stays clean for
/// command output.
fn init_tracing() -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let Some(data_dir) = dirs::data_dir() else {
    return Ok(None);
  };
  let log_dir = data_dir.join("stationdb");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "stationdb.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}
