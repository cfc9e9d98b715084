use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use export_mail::config::{ExportConfig, Limit, DEFAULT_PORT};
use export_mail::export::{Exporter, PolicyKind, DEFAULT_RECONNECT_EVERY};
use export_mail::mailbox::Pop3Mailbox;
use export_mail::store::FsStore;

const ABOUT: &str = "Visit https://github.com/gonejack/export-mail";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Newest message first, skipping what the ledger lists
    NewestFirst,
    /// Highest message number down, stopping at the first error
    Descending,
}

#[derive(Debug, Parser)]
#[command(name = "export-mail", version)]
#[command(about = "Command line tool for downloading mails.", long_about = None)]
struct Args {
    /// Set pop3 host.
    #[arg(long, required_unless_present = "about")]
    host: Option<String>,

    /// Set pop3 port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Set Username.
    #[arg(long, default_value = "")]
    username: String,

    /// Set Password.
    #[arg(long, env = "EXPORT_MAIL_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Turn TLS off.
    #[arg(long = "disable-tls")]
    disable_tls: bool,

    /// Accept invalid TLS certificates and host names.
    #[arg(long)]
    insecure: bool,

    /// Remove from server after export.
    #[arg(long = "server-remove")]
    server_remove: bool,

    /// How many mails going to save, 0 for no limit.
    #[arg(long, default_value_t = 0)]
    num: usize,

    /// Directory to save mails in.
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// File recording exported mails [default: <OUTPUT>/saved-uid.json]
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Order to export in.
    #[arg(long, value_enum, default_value_t = Policy::NewestFirst)]
    policy: Policy,

    /// With --policy descending and --server-remove, reconnect after this many mails.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_EVERY, value_parser = clap::value_parser!(u32).range(1..))]
    reconnect_every: u32,

    /// Network timeout in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Verbose printing; repeat to trace the POP3 conversation.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// About.
    #[arg(long)]
    about: bool,
}

impl Args {
    fn level(&self) -> Level {
        match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    fn mailbox(&self) -> Pop3Mailbox {
        Pop3Mailbox::new(self.username.as_str(), self.password.as_str())
            .danger_skip_tls_verify(self.insecure)
            .timeout(self.timeout.map(Duration::from_secs))
            .debug(self.verbose >= 2)
    }

    fn config(&self) -> ExportConfig {
        let mut config = ExportConfig::new(self.host.clone().unwrap_or_default());
        config.port = self.port;
        config.tls = !self.disable_tls;
        config.output_dir = self.output.clone();
        config.ledger_path = self.ledger.clone();
        config.delete = self.server_remove;
        config.limit = Limit::from(self.num);
        config.policy = match self.policy {
            Policy::NewestFirst => PolicyKind::NewestFirst,
            Policy::Descending => PolicyKind::Descending {
                reconnect_every: self.reconnect_every,
            },
        };
        config
    }
}

fn run(args: &Args) -> export_mail::Result<()> {
    Exporter::new(args.mailbox(), FsStore, args.config()).run()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    if args.about {
        println!("{}", ABOUT);
        return ExitCode::SUCCESS;
    }

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_target(false)
        .with_max_level(args.level())
        .finish();

    tracing::subscriber::with_default(subscriber, || match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("export failed: {}", e);
            ExitCode::FAILURE
        }
    })
}
