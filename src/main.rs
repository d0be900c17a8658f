use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::{debug, error};
use mimalloc::MiMalloc;

use newsd::{docstore, params, repo, store, types};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "newsd")]
#[command(about = "News ticker maintenance: relational store, public projection and media")]
struct Cli {
    /// Overrides NEWSD_DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Overrides NEWSD_STORE_URL
    #[arg(long, global = true)]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the database migrations
    Migrate,
    /// Create a news item
    Create(CreateArgs),
    /// Print a news item
    Show { id: i64 },
    /// Publish a news item
    Publish { id: i64 },
    /// Move a news item back to draft
    Unpublish { id: i64 },
    /// Archive a news item
    Archive { id: i64 },
    /// Raise or lower the breaking flag
    Breaking {
        id: i64,
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },
    /// Soft delete a news item
    Delete { id: i64 },
    /// Write every live item to the document store
    SyncAll,
    /// List every item, whatever its status, newest first
    List {
        #[arg(long)]
        status: Option<types::NewsStatus>,
        #[arg(long)]
        source: Option<types::NewsSource>,
        #[arg(long)]
        category: Option<String>,
        /// Keep only items with (`true`) or without (`false`) the breaking flag
        #[arg(long)]
        breaking: Option<bool>,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List live items from the relational store
    Active {
        #[arg(long)]
        source: Option<types::NewsSource>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        breaking: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List the public feed from the document store
    Feed {
        #[arg(long)]
        breaking: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Import an upstream news payload from a json file
    Import {
        file: PathBuf,
        #[arg(long, default_value = "external")]
        source: types::NewsSource,
    },
    /// Object store operations
    #[command(subcommand)]
    Object(ObjectCommands),
}

#[derive(Args)]
struct CreateArgs {
    title: String,
    #[arg(long, default_value = "")]
    content: String,
    #[arg(long, default_value = "internal")]
    source: types::NewsSource,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, default_value_t = 0)]
    priority: i32,
    /// Expiry as an RFC 3339 timestamp
    #[arg(long)]
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[arg(long)]
    publish: bool,
}

#[derive(Subcommand)]
enum ObjectCommands {
    /// Upload a file under a generated key
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "news")]
        folder: String,
        /// Guessed from the file extension when missing
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download an object into a file
    Download { key: String, output: PathBuf },
    /// Delete an object
    Rm { key: String },
    /// List objects under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print the public link of an object
    Url { key: String },
    /// Print a presigned link of an object
    Presign {
        key: String,
        #[arg(long)]
        minutes: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let conf = params::configurables();

    match cli.command {
        Commands::Object(cmd) => {
            let location = cli.store_url.as_deref().unwrap_or(&conf.store_url);
            let store = store::Store::try_from_url(location, conf)?;
            run_object(&store, cmd).await
        }
        Commands::Migrate => {
            let repo = connect(cli.database_url.as_deref(), conf).await?;
            let result = repo.migrate().await;
            repo.close().await;
            Ok(result?)
        }
        cmd => {
            let repo = connect(cli.database_url.as_deref(), conf).await?;
            let firestore =
                docstore::Firestore::open(docstore::FirestoreConfig::from_configurables(conf))
                    .await?;
            let facade = repo::FacadeNews::new(Arc::new(repo.clone()), Arc::new(firestore.clone()));

            let result = run_news(&facade, cmd).await;

            firestore.close();
            repo.close().await;
            result
        }
    }
}

async fn connect(
    database_url: Option<&str>,
    conf: &params::Configurables,
) -> Result<repo::Repository, repo::Error> {
    let url = database_url.unwrap_or(&conf.database_url);
    repo::Repository::try_new(url, conf.db_max_connections).await
}

async fn run_news(facade: &repo::FacadeNews, cmd: Commands) -> Result<(), Box<dyn Error>> {
    match cmd {
        Commands::Create(args) => {
            let mut item = types::NewsItem::new(&args.title, &args.content)
                .with_source(args.source)
                .with_priority(args.priority);
            if let Some(category) = &args.category {
                item = item.with_category(category);
            }
            if let Some(expires_at) = args.expires_at {
                item = item.with_expiry(expires_at);
            }
            if args.publish {
                item = item.with_status(types::NewsStatus::Published);
            }
            print_item(&facade.create(item).await?);
        }
        Commands::Show { id } => print_item(&facade.find(id).await?),
        Commands::Publish { id } => print_item(&facade.publish(id).await?),
        Commands::Unpublish { id } => print_item(&facade.unpublish(id).await?),
        Commands::Archive { id } => print_item(&facade.archive(id).await?),
        Commands::Breaking { id, on } => print_item(&facade.set_breaking(id, on).await?),
        Commands::Delete { id } => {
            facade.delete(id).await?;
            println!("{} news item {id}", "deleted".red());
        }
        Commands::SyncAll => {
            let report = facade.sync_all().await?;
            println!(
                "{} {} documents ({} live rows, {} skipped)",
                "synced".green().bold(),
                report.written,
                report.fetched,
                report.skipped
            );
        }
        Commands::List {
            status,
            source,
            category,
            breaking,
            page,
            limit,
        } => {
            let filter = repo::ListFilter {
                status,
                source,
                category,
                breaking,
                page,
                limit,
            };
            let page = facade.list(&filter).await?;
            for item in &page.items {
                print_item(item);
            }
            println!(
                "{}",
                format!(
                    "page {}/{} ({} items)",
                    page.page,
                    page.pages(),
                    page.total
                )
                .dimmed()
            );
        }
        Commands::Active {
            source,
            category,
            breaking,
            limit,
        } => {
            let filter = repo::ActiveFilter {
                source,
                category,
                breaking_only: breaking,
                limit,
            };
            for item in facade.active(&filter).await? {
                print_item(&item);
            }
        }
        Commands::Feed { breaking, limit } => {
            for doc in facade.public_feed(limit, breaking).await? {
                let marker = if doc.is_breaking { "!".red().bold() } else { " ".normal() };
                println!(
                    "{marker} {:>6} {:>3} {} {}",
                    doc.id.bold(),
                    doc.priority,
                    doc.published_at.format("%Y-%m-%d %H:%M"),
                    doc.title
                );
            }
        }
        Commands::Import { file, source } => {
            let raw = tokio::fs::read(&file).await?;
            let payload: serde_json::Value = serde_json::from_slice(&raw)?;
            print_item(&facade.import_external(&payload, source).await?);
        }
        Commands::Migrate | Commands::Object(_) => {
            debug!("command handled without the news facade");
        }
    }

    Ok(())
}

async fn run_object(store: &store::Store, cmd: ObjectCommands) -> Result<(), Box<dyn Error>> {
    match cmd {
        ObjectCommands::Upload {
            file,
            folder,
            content_type,
        } => {
            let content_type = content_type.unwrap_or_else(|| {
                store::content_type_for_key(&file.to_string_lossy()).to_owned()
            });
            let data = tokio::fs::read(&file).await?;
            let url = store.write(data.into(), &content_type, &folder).await?;
            println!("{} {url}", "uploaded".green().bold());
        }
        ObjectCommands::Download { key, output } => {
            let (data, content_type) = store.read(&key).await?;
            tokio::fs::write(&output, &data).await?;
            println!(
                "{} {} bytes ({content_type}) to {}",
                "downloaded".green().bold(),
                data.len(),
                output.display()
            );
        }
        ObjectCommands::Rm { key } => {
            store.delete(&key).await?;
            println!("{} {key}", "deleted".red());
        }
        ObjectCommands::Ls { prefix } => {
            for key in store.list(&prefix).await? {
                println!("{key}");
            }
        }
        ObjectCommands::Url { key } => println!("{}", store.public_url(&key)?),
        ObjectCommands::Presign { key, minutes } => {
            let expires_in = minutes.map(|m| Duration::from_secs(m * 60));
            println!("{}", store.presigned_url(&key, expires_in).await?);
        }
    }

    Ok(())
}

fn print_item(item: &types::NewsItem) {
    let status = match item.status {
        types::NewsStatus::Published if item.is_live() => item.status.as_str().green(),
        types::NewsStatus::Published => item.status.as_str().yellow(),
        types::NewsStatus::Draft => item.status.as_str().normal(),
        types::NewsStatus::Archived => item.status.as_str().dimmed(),
    };
    let breaking = if item.is_breaking {
        "BREAKING".red().bold()
    } else {
        "".normal()
    };

    println!(
        "{:>6} [{status}] p{} {} {breaking}",
        item.id.to_string().bold(),
        item.priority,
        item.title
    );
}
