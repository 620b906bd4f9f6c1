//! edbm database editor
//!
//! Runs one command against a database, or with no command reads
//! one-letter commands from stdin.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use edbm::{Database, LockStrategy, Options};

/// edbm editor
#[derive(Parser, Debug)]
#[command(name = "edbm", version)]
#[command(about = "Inspect and edit an edbm database")]
struct Args {
    /// Database name, without the .dir/.pag/.dat suffix
    name: PathBuf,

    /// Locking strategy
    #[arg(long, value_enum)]
    lock: Option<LockArg>,

    /// Open read-only
    #[arg(long)]
    read_only: bool,

    /// Create (or empty) the database before opening it
    #[arg(long)]
    create: bool,

    /// JSON options file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LockArg {
    ByteRange,
    WholeFile,
    None,
}

impl From<LockArg> for LockStrategy {
    fn from(arg: LockArg) -> Self {
        match arg {
            LockArg::ByteRange => LockStrategy::ByteRange,
            LockArg::WholeFile => LockStrategy::WholeFile,
            LockArg::None => LockStrategy::None,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// The key to look up
        key: String,
    },

    /// Store a key-value pair
    Put {
        /// The key to store
        key: String,

        /// The value to store
        value: String,
    },

    /// Delete a key
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print every key-value pair
    List,

    /// Print table statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every entry
    Truncate,
}

const HELP: &str = "\
g key        find key and print its value
l key        find key and keep its page locked until the next write or u
p key value  store value under key
d            delete the current record
r            rewind
n            step to the next record and print it
u            release the current page lock
w            print every record
t            truncate the database
s            print statistics
q, x         quit
?            this text";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut options = match &args.config {
        Some(path) => Options::from_json_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => Options::default(),
    };
    if let Some(lock) = args.lock {
        options = options.lock_strategy(lock.into());
    }
    if args.read_only {
        options = options.read_only(true);
    }

    if args.create {
        edbm::truncate(&args.name)
            .with_context(|| format!("creating {}", args.name.display()))?;
    }
    let mut db = Database::open(&args.name, options)
        .with_context(|| format!("opening {}", args.name.display()))?;

    match args.command {
        Some(command) => run(&mut db, command)?,
        None => {
            let stdin = io::stdin();
            let stdout = io::stdout();
            repl(&mut db, stdin.lock(), stdout.lock())?;
        }
    }
    db.close()?;
    Ok(())
}

fn run(db: &mut Database, command: Commands) -> Result<()> {
    match command {
        Commands::Get { key } => match db.fetch(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => bail!("{}: not found", key),
        },
        Commands::Put { key, value } => db.put(key.as_bytes(), value.as_bytes())?,
        Commands::Delete { key } => {
            if !db.remove(key.as_bytes())? {
                bail!("{}: not found", key);
            }
        }
        Commands::List => {
            let stdout = io::stdout();
            list(db, &mut stdout.lock())?;
        }
        Commands::Stats { json } => {
            let stats = db.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats);
            }
        }
        Commands::Truncate => db.truncate()?,
    }
    Ok(())
}

fn list<W: Write>(db: &mut Database, out: &mut W) -> Result<()> {
    for entry in db.entries() {
        let (key, value) = entry?;
        writeln!(
            out,
            "{}\t{}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        )?;
    }
    Ok(())
}

fn repl<R: BufRead, W: Write>(db: &mut Database, input: R, mut out: W) -> Result<()> {
    write!(out, "edbm> ")?;
    out.flush()?;
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if matches!(line, "q" | "x") {
            break;
        }
        if !line.is_empty() {
            if let Err(e) = execute(db, line, &mut out) {
                writeln!(out, "error: {}", e)?;
            }
        }
        write!(out, "edbm> ")?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

fn execute<W: Write>(db: &mut Database, line: &str, out: &mut W) -> Result<()> {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim_start()),
        None => (line, ""),
    };

    match command {
        "g" => {
            if rest.is_empty() {
                bail!("usage: g key");
            }
            if db.seek(rest.as_bytes())? {
                let value = db.get()?;
                writeln!(out, "{}", String::from_utf8_lossy(&value))?;
            } else {
                writeln!(out, "not found")?;
            }
        }
        "l" => {
            if rest.is_empty() {
                bail!("usage: l key");
            }
            if db.seek_for_update(rest.as_bytes())? {
                writeln!(out, "locked")?;
            } else {
                writeln!(out, "locked, not found")?;
            }
        }
        "p" => {
            let Some((key, value)) = rest.split_once(char::is_whitespace) else {
                bail!("usage: p key value");
            };
            db.put(key.as_bytes(), value.trim_start().as_bytes())?;
        }
        "d" => {
            if db.delete()? {
                writeln!(out, "deleted")?;
            } else {
                writeln!(out, "already gone")?;
            }
        }
        "r" => db.rewind(),
        "n" => match db.next()? {
            Some(key) => {
                let value = db.get()?;
                writeln!(
                    out,
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                )?;
            }
            None => writeln!(out, "end of database")?,
        },
        "u" => db.unlock()?,
        "w" => list(db, out)?,
        "t" => db.truncate()?,
        "s" => writeln!(out, "{}", db.stats()?)?,
        "?" => writeln!(out, "{}", HELP)?,
        _ => writeln!(out, "unknown command {:?}, ? for help", command)?,
    }
    Ok(())
}
