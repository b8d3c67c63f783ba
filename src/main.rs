use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use ticketsync::cache::{CacheLayer, CacheResult, CacheSource, NetworkStatus, SqliteStorage};
use ticketsync::config::Config;
use ticketsync::error::is_offline_miss;
use ticketsync::offline::{OfflineQueue, OptimisticApplier, Replayer, SqliteMutationQueue};
use ticketsync::session::{Identity, StaticSession};
use ticketsync::tickets::{
  CachedTicketClient, HttpTicketApi, NewTicket, Ticket, TicketApi, TicketChanges, TicketFilter,
  TicketStatus, UpsertPropagator, UserRef,
};

#[derive(Parser, Debug)]
#[command(name = "ticketsync")]
#[command(about = "Offline-capable ticket client with a local cache and write queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/ticketsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Serve reads from the cache and queue writes without touching the network
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List tickets
  List {
    #[arg(long)]
    status: Option<TicketStatus>,
    #[arg(long)]
    assignee: Option<String>,
    #[arg(long)]
    search: Option<String>,
  },
  /// Show one ticket
  Show { id: String },
  /// Change ticket fields
  Update {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    status: Option<TicketStatus>,
    #[arg(long)]
    priority: Option<String>,
  },
  /// Assign a ticket to a user
  Assign {
    id: String,
    user_id: String,
    #[arg(long)]
    name: Option<String>,
  },
  /// Resolve a ticket
  Resolve {
    id: String,
    #[arg(long)]
    note: Option<String>,
  },
  /// Create a ticket
  Create {
    title: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long = "type")]
    issue_type: Option<String>,
  },
  /// Show writes waiting to be sent
  Pending,
  /// Send queued writes to the server
  Replay,
}

struct App {
  client: CachedTicketClient<SqliteStorage, SqliteMutationQueue>,
  replayer: Replayer<SqliteStorage, SqliteMutationQueue>,
  queue: OfflineQueue<SqliteMutationQueue>,
}

impl App {
  fn new(config: &Config, offline: bool) -> Result<Self> {
    let session = Arc::new(StaticSession::new(
      config.server.user.clone(),
      Config::api_token(),
    ));
    let identity: Arc<dyn Identity> = session.clone();
    let network = Arc::new(NetworkStatus::new(offline));
    let timeout = config.request_timeout();

    let cache_path = config.cache_path()?;
    let storage = Arc::new(SqliteStorage::open(&cache_path)?);
    let queue = OfflineQueue::new(
      Arc::new(SqliteMutationQueue::open(&cache_path)?),
      identity.clone(),
    );
    let api: Arc<dyn TicketApi> = Arc::new(HttpTicketApi::new(&config.server.url, session, timeout)?);

    let propagator = Arc::new(UpsertPropagator::new(storage.clone(), identity.clone()));
    let cache = CacheLayer::new(storage.clone(), identity, network).with_request_timeout(timeout);
    let applier = OptimisticApplier::new(queue.clone(), storage, propagator.clone());

    Ok(Self {
      client: CachedTicketClient::new(api.clone(), cache, propagator.clone(), applier),
      replayer: Replayer::new(queue.clone(), api, propagator).with_request_timeout(timeout),
      queue,
    })
  }

  async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::List {
        status,
        assignee,
        search,
      } => {
        let filter = TicketFilter {
          status,
          assignee,
          search,
        };
        let result = self.client.list_tickets(&filter).await?;
        print_source(&result);
        for ticket in &result.data {
          print_row(ticket);
        }
      }
      Command::Show { id } => {
        let result = self.client.get_ticket(&id).await?;
        print_source(&result);
        print_detail(&result.data)?;
      }
      Command::Update {
        id,
        title,
        description,
        status,
        priority,
      } => {
        let changes = TicketChanges {
          title,
          description,
          status,
          priority,
          ..TicketChanges::default()
        };
        print_row(&self.client.update_ticket(&id, changes).await?);
      }
      Command::Assign { id, user_id, name } => {
        let assignee = UserRef {
          id: user_id,
          display_name: name,
        };
        print_row(&self.client.assign_ticket(&id, assignee).await?);
      }
      Command::Resolve { id, note } => {
        print_row(&self.client.resolve_ticket(&id, note).await?);
      }
      Command::Create {
        title,
        description,
        priority,
        issue_type,
      } => {
        let draft = NewTicket {
          title,
          description,
          priority,
          issue_type,
        };
        print_row(&self.client.create_ticket(draft).await?);
      }
      Command::Pending => {
        let pending = self.queue.pending()?;
        if pending.is_empty() {
          println!("No queued writes");
        }
        for entry in pending {
          println!(
            "{}\t{}\t{} {}\t{}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.ticket_id,
            entry.verb.as_str(),
            entry.endpoint,
            entry.kind.as_str()
          );
        }
      }
      Command::Replay => {
        let summary = self.replayer.replay_pending().await?;
        println!(
          "confirmed {}, rejected {}, remaining {}{}",
          summary.confirmed,
          summary.rejected,
          summary.remaining,
          if summary.interrupted {
            " (server unreachable)"
          } else {
            ""
          }
        );
      }
    }
    Ok(())
  }
}

fn print_source<T>(result: &CacheResult<T>) {
  let label = match result.source {
    CacheSource::Network | CacheSource::Bypass => return,
    CacheSource::Fallback => "server unreachable, showing cached data",
    CacheSource::Offline => "offline, showing cached data",
  };
  match result.cached_at {
    Some(at) => eprintln!("({} from {})", label, at.format("%Y-%m-%d %H:%M")),
    None => eprintln!("({})", label),
  }
}

fn print_row(ticket: &Ticket) {
  let marker = if ticket.pending_sync { " *" } else { "" };
  println!(
    "{}\t{}\t{}{}",
    ticket.id,
    ticket.status.as_str(),
    ticket.title,
    marker
  );
}

fn print_detail(ticket: &Ticket) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(ticket)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _guard = ticketsync::logging::init(&config.log_directory()?, config.log.level.as_deref())?;

  let app = App::new(&config, args.offline)?;
  match app.run(args.command).await {
    Err(err) if is_offline_miss(&err) => {
      eprintln!("{}", err);
      std::process::exit(2);
    }
    other => other,
  }
}
