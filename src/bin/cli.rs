use clap::{Parser, Subcommand, ValueEnum};
use docstore::{Config, Document, DocumentFormat, DocumentStore, Result, SpillFormat};
use std::fs::File;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;

/// Interactive shell over a document store
///
/// Commands are read from stdin, one per line.
#[derive(Debug, Parser)]
#[clap(name = "docstore", version = "0.1.0")]
struct Cli {
    /// Directory holding spilled documents
    #[clap(short, long, default_value = "docstore_data")]
    path: PathBuf,

    /// Maximum number of documents kept in memory
    #[clap(long)]
    max_count: Option<usize>,

    /// Maximum combined size in bytes of documents kept in memory
    #[clap(long)]
    max_bytes: Option<usize>,

    /// Encoding of spilled documents
    #[clap(long, value_enum, default_value_t = Encoding::Json)]
    format: Encoding,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Encoding {
    Json,
    Bincode,
}

impl From<Encoding> for SpillFormat {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Json => SpillFormat::Json,
            Encoding::Bincode => SpillFormat::Bincode,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Text,
    Binary,
}

impl From<Kind> for DocumentFormat {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Text => DocumentFormat::Text,
            Kind::Binary => DocumentFormat::Binary,
        }
    }
}

/// A single shell command
#[derive(Debug, Parser)]
#[clap(name = "", no_binary_name = true)]
struct Line {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store the contents of a file
    Put {
        key: String,
        file: PathBuf,
        #[clap(long, value_enum, default_value_t = Kind::Text)]
        format: Kind,
    },

    /// Store the given words as a text document
    PutText {
        key: String,
        #[clap(required = true)]
        words: Vec<String>,
    },

    /// Print a document
    Get { key: String },

    /// Delete a document
    Delete { key: String },

    /// Find documents containing a word
    Search { word: String },

    /// Find documents containing a word with the given prefix
    Prefix { prefix: String },

    /// Delete every document containing a word
    DeleteAll { word: String },

    /// Delete every document containing a word with the given prefix
    DeletePrefix { prefix: String },

    /// Undo the last change, or the last change to KEY
    Undo { key: Option<String> },

    /// Set the resident document limit
    MaxCount { limit: usize },

    /// Set the resident byte limit
    MaxBytes { limit: usize },

    /// Print usage counters
    Stats,

    /// List every key
    List,

    /// Leave the shell
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let mut config = Config::new().path(cli.path).spill_format(cli.format.into());
    if let Some(limit) = cli.max_count {
        config = config.max_document_count(limit);
    }
    if let Some(limit) = cli.max_bytes {
        config = config.max_document_bytes(limit);
    }

    let mut store = DocumentStore::open(config)?;
    let interactive = io::stdin().is_terminal();

    let mut lines = io::stdin().lock().lines();
    loop {
        if interactive {
            print!("> ");
            io::stdout().flush()?;
        }
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Line::try_parse_from(line.split_whitespace()) {
            Ok(parsed) => parsed.command,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match run(&mut store, command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => eprintln!("error: {err}"),
        }
    }

    Ok(())
}

/// Executes one command, returning `false` when the shell should exit
fn run(store: &mut DocumentStore, command: Command) -> Result<bool> {
    match command {
        Command::Put { key, file, format } => {
            let file = File::open(file)?;
            report_put(store.put(Some(file), &key, format.into())?);
        }
        Command::PutText { key, words } => {
            let doc = Document::text(key, words.join(" "))?;
            report_put(store.put_document(doc)?);
        }
        Command::Get { key } => match store.get(&key)? {
            Some(doc) => println!("{}", describe(&doc)),
            None => println!("Key not found"),
        },
        Command::Delete { key } => {
            if store.delete(&key)? {
                println!("OK");
            } else {
                println!("Key not found");
            }
        }
        Command::Search { word } => {
            for doc in store.search(&word)? {
                println!("{} ({})", describe(&doc), doc.word_count(&word));
            }
        }
        Command::Prefix { prefix } => {
            for doc in store.search_by_prefix(&prefix)? {
                println!("{} ({})", describe(&doc), doc.prefix_count(&prefix));
            }
        }
        Command::DeleteAll { word } => print_keys(store.delete_all(&word)?),
        Command::DeletePrefix { prefix } => print_keys(store.delete_all_with_prefix(&prefix)?),
        Command::Undo { key } => {
            match key {
                Some(key) => store.undo_key(&key)?,
                None => store.undo()?,
            }
            println!("OK");
        }
        Command::MaxCount { limit } => {
            store.set_max_document_count(limit)?;
            println!("OK");
        }
        Command::MaxBytes { limit } => {
            store.set_max_document_bytes(limit)?;
            println!("OK");
        }
        Command::Stats => {
            println!("documents: {}", store.len());
            println!(
                "resident:  {} of {} documents, {} of {} bytes",
                store.document_count(),
                store.max_document_count(),
                store.document_bytes(),
                store.max_document_bytes()
            );
            println!("undo:      {}", store.undo_depth());
        }
        Command::List => {
            for key in store.keys() {
                let state = if store.is_spilled(key) { "spilled" } else { "resident" };
                println!("{key} [{state}]");
            }
        }
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

fn report_put(previous_hash: u64) {
    if previous_hash == 0 {
        println!("OK");
    } else {
        println!("OK (replaced {previous_hash:016x})");
    }
}

fn describe(doc: &Document) -> String {
    match doc.text_content() {
        Some(text) => format!("{}: {}", doc.key(), text),
        None => format!("{}: <{} bytes of binary data>", doc.key(), doc.byte_len()),
    }
}

fn print_keys(keys: impl IntoIterator<Item = String>) {
    let mut keys: Vec<_> = keys.into_iter().collect();
    keys.sort_unstable();
    println!("deleted {}", keys.len());
    for key in keys {
        println!("  {key}");
    }
}
